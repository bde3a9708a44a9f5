use deployment_ledger::LedgerKey;
use ethers::{
    abi::Token,
    signers::Signer,
    types::{Address, U256},
};
use eyre::Result;
use fixed_point_macros::uint256;
use lending_deployer::{
    constants::BOB,
    keys,
    mock::MockTx,
    pipelines, DeployError, RunState, StepStatus, VerificationStatus,
};
use lending_params::{Decimal, MarketParams, ParameterSet};

use crate::common::Harness;

fn usdc() -> MarketParams {
    MarketParams {
        symbol: "tUSDC".into(),
        name: "tUSDC".into(),
        underlying: Address::repeat_byte(0x05),
        price: Some(Decimal::from(1)),
        collateral_factor: "0.8".parse().unwrap(),
        ..Default::default()
    }
}

fn params() -> ParameterSet {
    let mut params = ParameterSet {
        admin: Some(BOB.address()),
        ..Default::default()
    };
    params.markets.push(usdc());
    params
}

#[tokio::test]
async fn test_full_protocol() -> Result<()> {
    let harness = Harness::new()?;
    harness
        .gateway
        .set_state(usdc().underlying, "decimals", vec![], vec![Token::Uint(6.into())]);

    let report = harness.orchestrator().run(&pipelines::protocol(&params())?).await;
    assert!(report.is_success(), "{report}");
    assert!(report.warnings.is_empty());
    assert!(report
        .components()
        .all(|c| c.verification == VerificationStatus::Verified));

    // Every component and configuration outcome is on disk.
    let ledger = harness.persisted()?;
    for key in [
        keys::mock_price_oracle(),
        keys::unitroller(),
        keys::comptroller(),
        keys::controller_config(),
        keys::price_oracle(),
        keys::compound_lens(),
        keys::market("tMetis"),
        keys::market("tUSDC"),
        keys::listed("tUSDC"),
        keys::price("tUSDC"),
        keys::collateral_factor("tMetis"),
        keys::collateral_factor("tUSDC"),
        LedgerKey::from(["IRModels", "2__20"]),
        LedgerKey::from(["IRModels", "JumpRateModelV2", "2102400", "0__80__50__1000"]),
    ] {
        assert!(ledger.contains(&key), "{key} was not recorded");
    }
    assert!(!ledger.contains(&keys::pending_comptroller()));

    // Markets point at the proxy and the market's own rate model.
    let unitroller = ledger.get(&keys::unitroller())?;
    let jump_rate = ledger.get(&keys::rate_model(&params().markets[0].rate_model))?;
    let usdc_market = ledger.get(&keys::market("tUSDC"))?;
    let usdc_args = harness
        .gateway
        .transactions()
        .into_iter()
        .find_map(|tx| match tx {
            MockTx::Deploy { address, args, .. } if address == usdc_market => Some(args),
            _ => None,
        });
    assert_eq!(
        usdc_args,
        Some(vec![
            Token::Address(usdc().underlying),
            Token::Address(unitroller),
            Token::Address(jump_rate),
            Token::Uint(uint256!(2e24)),
            Token::String("tUSDC".into()),
            Token::String("tUSDC".into()),
            Token::Uint(18.into()),
            Token::Address(BOB.address()),
        ])
    );

    // Prices are scaled for the underlying's decimals.
    let prices = harness.gateway.calls_to("mockUpdatePrice");
    let oracle = ledger.get(&keys::mock_price_oracle())?;
    assert!(prices.contains(&(
        oracle,
        vec![Token::Address(usdc_market), Token::Uint(uint256!(1e30))]
    )));
    Ok(())
}

#[tokio::test]
async fn test_rate_model_arguments() -> Result<()> {
    let harness = Harness::new()?;
    let report = harness
        .orchestrator()
        .run(&pipelines::rate_models(&params())?)
        .await;
    assert!(report.is_success(), "{report}");

    let jump = harness.gateway.transactions().into_iter().find_map(|tx| match tx {
        MockTx::Deploy { contract, args, .. } if contract == "JumpRateModelV2" => Some(args),
        _ => None,
    });
    assert_eq!(
        jump,
        Some(vec![
            Token::Uint(U256::zero()),
            Token::Uint(uint256!(0.5e18)),
            Token::Uint(uint256!(47.5e18)),
            Token::Uint(uint256!(0.8e18)),
            Token::Address(BOB.address()),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_a_no_op() -> Result<()> {
    let mut harness = Harness::new()?;
    let pipeline = pipelines::protocol(&params())?;
    assert!(harness.orchestrator().run(&pipeline).await.is_success());
    let submitted = harness.gateway.transactions().len();

    harness.restart()?;
    let report = harness.orchestrator().run(&pipeline).await;

    assert!(report.is_success(), "{report}");
    for id in ["deploy-unitroller", "adopt-comptroller", "deploy-lens", "list-market:tUSDC"] {
        assert_eq!(report.step(id).map(|s| &s.status), Some(&StepStatus::Skipped), "{id}");
    }
    // Configuration is checked against the chain and found unchanged.
    for id in ["configure-controller", "set-price:tUSDC", "set-collateral-factor:tUSDC"] {
        assert_eq!(report.step(id).map(|s| &s.status), Some(&StepStatus::Completed), "{id}");
    }
    assert_eq!(harness.gateway.transactions().len(), submitted);
    Ok(())
}

#[tokio::test]
async fn test_changed_parameters_are_applied_on_rerun() -> Result<()> {
    let mut harness = Harness::new()?;
    assert!(harness
        .orchestrator()
        .run(&pipelines::protocol(&params())?)
        .await
        .is_success());
    let submitted = harness.gateway.transactions().len();

    let mut changed = params();
    changed.markets[1].collateral_factor = "0.75".parse()?;
    changed.controller.max_assets = 30;
    harness.restart()?;
    let report = harness
        .orchestrator()
        .run(&pipelines::configure(&changed)?)
        .await;

    assert!(report.is_success(), "{report}");
    let usdc_market = harness.ledger.get(&keys::market("tUSDC"))?;
    let unitroller = harness.ledger.get(&keys::unitroller())?;
    let factors = harness.gateway.calls_to("_setCollateralFactor");
    assert_eq!(
        factors.last(),
        Some(&(
            unitroller,
            vec![Token::Address(usdc_market), Token::Uint(uint256!(0.75e18))]
        ))
    );
    let max_assets = harness.gateway.calls_to("_setMaxAssets");
    assert_eq!(max_assets.last(), Some(&(unitroller, vec![Token::Uint(30.into())])));
    // Only the two changed values were sent.
    assert_eq!(harness.gateway.transactions().len(), submitted + 2);
    assert_eq!(harness.gateway.calls_to("_setCloseFactor").len(), 1);
    assert_eq!(harness.gateway.calls_to("mockUpdatePrice").len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_resume_skips_recorded_unitroller() -> Result<()> {
    let harness = Harness::new()?;
    let unitroller = Address::repeat_byte(0x11);
    harness.ledger.set(&keys::unitroller(), unitroller)?;

    let report = harness
        .orchestrator()
        .run(&pipelines::protocol(&params())?)
        .await;

    assert!(report.is_success(), "{report}");
    assert_eq!(
        report.step("deploy-unitroller").map(|s| &s.status),
        Some(&StepStatus::Skipped)
    );
    assert!(harness.gateway.deploys_of("Unitroller").is_empty());
    // The rest of the run is wired to the recorded proxy.
    let nominations = harness.gateway.calls_to("_setPendingImplementation");
    assert_eq!(nominations.len(), 1);
    assert_eq!(nominations[0].0, unitroller);
    assert_eq!(harness.ledger.get(&keys::controller_config())?, unitroller);
    Ok(())
}

#[tokio::test]
async fn test_single_market_against_existing_protocol() -> Result<()> {
    let harness = Harness::new()?;
    let base = ParameterSet::default();
    assert!(harness
        .orchestrator()
        .run(&pipelines::protocol(&base)?)
        .await
        .is_success());

    let report = harness
        .orchestrator()
        .run(&pipelines::single_market(&params(), "tUSDC")?)
        .await;

    assert!(report.is_success(), "{report}");
    // The market shares the jump rate model deployed with the protocol.
    assert_eq!(
        report
            .step("deploy-rate-model:IRModels/JumpRateModelV2/2102400/0__80__50__1000")
            .map(|s| &s.status),
        Some(&StepStatus::Skipped)
    );
    assert_eq!(harness.gateway.deploys_of("CErc20Immutable").len(), 2);
    assert!(harness.ledger.contains(&keys::collateral_factor("tUSDC")));
    Ok(())
}

#[tokio::test]
async fn test_live_price_check() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.options.check_live_price = true;
    let mut params = params();
    params.markets[1].price = None;

    let report = harness
        .orchestrator()
        .run(&pipelines::protocol(&params)?)
        .await;

    // tMetis has a mock price and passes, tUSDC has none on the oracle.
    assert!(harness.ledger.contains(&keys::collateral_factor("tMetis")));
    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "set-collateral-factor:tUSDC"
    ));
    assert!(matches!(report.error, Some(DeployError::UnexpectedState(_))));
    assert_eq!(harness.gateway.calls_to("_setCollateralFactor").len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_underlying_decimals_are_read_from_chain() -> Result<()> {
    let harness = Harness::new()?;
    harness.gateway.set_state(
        usdc().underlying,
        "decimals",
        vec![],
        vec![Token::Uint(300.into())],
    );
    let report = harness
        .orchestrator()
        .run(&pipelines::protocol(&params())?)
        .await;

    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "deploy-market:tUSDC"
    ));
    // The sibling market in the same stage still went through.
    assert!(harness.ledger.contains(&keys::market("tMetis")));
    assert!(!harness.ledger.contains(&keys::market("tUSDC")));
    Ok(())
}
