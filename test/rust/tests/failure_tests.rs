use std::time::Duration;

use deployment_ledger::LedgerKey;
use ethers::types::Address;
use eyre::Result;
use lending_deployer::{
    keys,
    orchestrator::Pipeline,
    pipelines,
    steps::SetCollateralFactor,
    DeployError, DeployWarning, RunState, StepStatus, VerificationStatus,
};
use lending_params::{
    Decimal, JumpRateParams, MarketParams, ParamError, ParameterSet, RateModelParams,
};

use crate::common::Harness;

#[tokio::test]
async fn test_collateral_factor_waits_for_price_oracle() -> Result<()> {
    let harness = Harness::new()?;
    for (i, key) in [
        keys::unitroller(),
        keys::comptroller(),
        keys::market("tMetis"),
        keys::listed("tMetis"),
    ]
    .iter()
    .enumerate()
    {
        harness
            .ledger
            .set(key, Address::from_low_u64_be(i as u64 + 1))?;
    }
    let pipeline =
        Pipeline::new("collateral").then(SetCollateralFactor::new(MarketParams::default(), false));

    let report = harness.orchestrator().run(&pipeline).await;

    assert!(matches!(
        &report.error,
        Some(DeployError::MissingDependency(key)) if *key == keys::price_oracle()
    ));
    assert!(harness.gateway.transactions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_verification_failure_is_a_warning() -> Result<()> {
    let harness = Harness::new()?;
    harness.verifier.fail_for("Unitroller");

    let report = harness
        .orchestrator()
        .run(&pipelines::protocol(&ParameterSet::default())?)
        .await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.warnings.len(), 1);
    let unitroller = harness.persisted()?.get(&keys::unitroller())?;
    assert!(matches!(
        &report.warnings[0],
        DeployWarning::VerificationFailed { step, key, address, .. }
            if step == "deploy-unitroller" && *key == keys::unitroller() && *address == unitroller
    ));
    let component = report
        .components()
        .find(|c| c.key == keys::unitroller())
        .map(|c| c.verification.clone());
    assert!(matches!(
        component,
        Some(VerificationStatus::VerificationFailed(_))
    ));
    // The next step ran against the unverified proxy.
    assert_eq!(
        harness.gateway.calls_to("_setPendingImplementation")[0].0,
        unitroller
    );
    Ok(())
}

#[tokio::test]
async fn test_submission_failure_keeps_earlier_steps() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.gateway.fail("CompoundLens");
    let pipeline = pipelines::protocol(&ParameterSet::default())?;

    let report = harness.orchestrator().run(&pipeline).await;

    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "deploy-lens"
    ));
    assert!(matches!(report.error, Some(DeployError::ChainSubmission { .. })));
    let failed = report.failed_step().map(|s| s.uncommitted.clone());
    assert_eq!(failed, Some(vec![keys::compound_lens()]));
    assert_eq!(
        report.steps.last().map(|s| s.id.as_str()),
        Some("deploy-lens")
    );

    // Only the steps before the failure are on disk.
    let committed: Vec<LedgerKey> = harness
        .persisted()?
        .entries()?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    let mut expected = vec![
        keys::controller_config(),
        keys::comptroller(),
        keys::mock_price_oracle(),
        keys::price_oracle(),
        keys::unitroller(),
    ];
    expected.sort();
    let mut committed = committed;
    committed.sort();
    assert_eq!(committed, expected);

    // A second run picks up at the failed step.
    harness.gateway.recover("CompoundLens");
    harness.restart()?;
    let report = harness.orchestrator().run(&pipeline).await;
    assert!(report.is_success(), "{report}");
    assert_eq!(
        report.step("adopt-comptroller").map(|s| &s.status),
        Some(&StepStatus::Skipped)
    );
    assert_eq!(
        report.step("deploy-lens").map(|s| &s.status),
        Some(&StepStatus::Completed)
    );
    assert_eq!(harness.gateway.deploys_of("Unitroller").len(), 1);
    assert_eq!(harness.gateway.deploys_of("Comptroller").len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_error_code_is_caught_before_submission() -> Result<()> {
    let harness = Harness::new()?;
    harness.gateway.reject_with_code("_supportMarket", 10);

    let report = harness
        .orchestrator()
        .run(&pipelines::protocol(&ParameterSet::default())?)
        .await;

    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "list-market:tMetis"
    ));
    assert!(matches!(report.error, Some(DeployError::ChainSubmission { .. })));
    assert!(harness.gateway.calls_to("_supportMarket").is_empty());
    assert!(harness.ledger.contains(&keys::market("tMetis")));
    Ok(())
}

#[tokio::test]
async fn test_stuck_confirmation_times_out() -> Result<()> {
    let harness = Harness::new()?;
    harness.gateway.stall("_setPriceOracle");

    let report = harness
        .orchestrator()
        .run(&pipelines::protocol(&ParameterSet::default())?)
        .await;

    assert!(matches!(
        report.error,
        Some(DeployError::ConfirmationTimeout { confirmations: 1, tx_hash: Some(_), .. })
    ));
    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "set-price-oracle"
    ));
    // The call went out, but nothing is recorded for an unconfirmed result.
    assert_eq!(harness.gateway.calls_to("_setPriceOracle").len(), 1);
    assert!(!harness.ledger.contains(&keys::price_oracle()));
    Ok(())
}

#[tokio::test]
async fn test_unanswered_submission_times_out() -> Result<()> {
    let harness = Harness::new()?;
    harness.gateway.hang("CompoundLens");

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        harness
            .orchestrator()
            .run(&pipelines::protocol(&ParameterSet::default())?),
    )
    .await?;

    assert!(matches!(
        report.error,
        Some(DeployError::ConfirmationTimeout { tx_hash: None, .. })
    ));
    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "deploy-lens"
    ));
    assert!(harness.gateway.deploys_of("CompoundLens").is_empty());
    assert!(!harness.ledger.contains(&keys::compound_lens()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_the_chain() -> Result<()> {
    let mut params = ParameterSet::default();
    params.markets[0].rate_model = RateModelParams::JumpRate(JumpRateParams {
        base_rate: Decimal::zero(),
        kink: Decimal::zero(),
        multiplier: Decimal::from(50),
        post_kink_multiplier: Decimal::from(1000),
        admin: None,
        blocks_per_year: 2_102_400,
    });
    assert!(matches!(
        pipelines::protocol(&params),
        Err(DeployError::Validation(ParamError::KinkOutOfRange(_)))
    ));

    params = ParameterSet::default();
    params.markets[0].symbol = "CompoundLens".into();
    assert!(matches!(
        pipelines::protocol(&params),
        Err(DeployError::Validation(ParamError::ReservedSymbol(symbol))) if symbol == "CompoundLens"
    ));

    params = ParameterSet::default();
    params.markets[0].collateral_factor = Decimal::from(2);
    assert!(matches!(
        pipelines::single_market(&params, "tMetis"),
        Err(DeployError::Validation(ParamError::CollateralFactorAboveOne { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn test_blocks_per_year_mismatch_is_recorded_under_observed_value() -> Result<()> {
    let harness = Harness::new()?;
    let model = RateModelParams::JumpRate(JumpRateParams {
        base_rate: Decimal::zero(),
        kink: Decimal::from(80),
        multiplier: Decimal::from(50),
        post_kink_multiplier: Decimal::from(1000),
        admin: None,
        blocks_per_year: 5_256_000,
    });
    let params = ParameterSet {
        rate_models: vec![model.clone()],
        markets: vec![],
        ..Default::default()
    };

    let report = harness
        .orchestrator()
        .run(&pipelines::rate_models(&params)?)
        .await;

    assert!(matches!(report.error, Some(DeployError::UnexpectedState(_))));
    assert!(!harness.ledger.contains(&keys::rate_model(&model)));
    assert!(harness.ledger.contains(&keys::jump_rate_model(
        2_102_400,
        "0__80__50__1000"
    )));

    // The mismatch is reported again without another deployment.
    let report = harness
        .orchestrator()
        .run(&pipelines::rate_models(&params)?)
        .await;
    assert!(matches!(report.error, Some(DeployError::UnexpectedState(_))));
    assert_eq!(harness.gateway.deploys_of("JumpRateModelV2").len(), 1);
    assert!(!harness.ledger.contains(&keys::rate_model(&model)));
    Ok(())
}
