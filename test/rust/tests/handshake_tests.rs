use ethers::{abi::Token, types::Address};
use eyre::Result;
use lending_deployer::{
    keys,
    mock::MockTx,
    orchestrator::Pipeline,
    pipelines,
    steps::{AdoptComptroller, ConfigureController, DeployUnitroller},
    DeployError, RunState,
};
use lending_params::{ControllerParams, ParameterSet};

use crate::common::Harness;

#[tokio::test]
async fn test_unadopted_proxy_is_not_a_controller() -> Result<()> {
    let harness = Harness::new()?;
    harness
        .ledger
        .set(&keys::unitroller(), Address::repeat_byte(0x11))?;
    let pipeline =
        Pipeline::new("configure").then(ConfigureController::new(ControllerParams::default()));

    let report = harness.orchestrator().run(&pipeline).await;

    assert!(matches!(
        &report.error,
        Some(DeployError::MissingDependency(key)) if *key == keys::comptroller()
    ));
    assert!(harness.gateway.transactions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_comptroller_recorded_after_both_halves() -> Result<()> {
    let harness = Harness::new()?;
    let pipeline = Pipeline::new("controller")
        .then(DeployUnitroller)
        .then(AdoptComptroller);

    let report = harness.orchestrator().run(&pipeline).await;
    assert!(report.is_success(), "{report}");

    let unitroller = harness.ledger.get(&keys::unitroller())?;
    let comptroller = harness.ledger.get(&keys::comptroller())?;
    assert!(!harness.ledger.contains(&keys::pending_comptroller()));

    // Deploy the logic, nominate it on the proxy, then accept from the logic.
    let calls: Vec<(String, Address)> = harness
        .gateway
        .transactions()
        .into_iter()
        .filter_map(|tx| match tx {
            MockTx::Call {
                function, contract, ..
            } => Some((function, contract)),
            MockTx::Deploy { .. } => None,
        })
        .collect();
    assert_eq!(
        calls,
        vec![
            ("_setPendingImplementation".to_string(), unitroller),
            ("_become".to_string(), comptroller),
        ]
    );
    assert_eq!(
        harness.gateway.calls_to("_become")[0].1,
        vec![Token::Address(unitroller)]
    );
    Ok(())
}

#[tokio::test]
async fn test_interrupted_handshake_resumes() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.gateway.stall("_become");
    let pipeline = pipelines::protocol(&ParameterSet::default())?;

    let report = harness.orchestrator().run(&pipeline).await;

    assert!(matches!(
        &report.state,
        RunState::Failed { step, .. } if step == "adopt-comptroller"
    ));
    assert!(matches!(
        report.error,
        Some(DeployError::ConfirmationTimeout { .. })
    ));
    // The logic contract is known, but not as the controller.
    let persisted = harness.persisted()?;
    let pending = persisted.get(&keys::pending_comptroller())?;
    assert!(!persisted.contains(&keys::comptroller()));

    harness.gateway.recover("_become");
    harness.restart()?;
    let report = harness.orchestrator().run(&pipeline).await;

    assert!(report.is_success(), "{report}");
    assert_eq!(harness.gateway.deploys_of("Comptroller"), vec![pending]);
    assert_eq!(harness.ledger.get(&keys::comptroller())?, pending);
    assert!(!harness.ledger.contains(&keys::pending_comptroller()));
    Ok(())
}

#[tokio::test]
async fn test_upgrade_replaces_comptroller() -> Result<()> {
    let harness = Harness::new()?;
    assert!(harness
        .orchestrator()
        .run(&pipelines::protocol(&ParameterSet::default())?)
        .await
        .is_success());
    let before = harness.ledger.get(&keys::comptroller())?;

    let report = harness
        .orchestrator()
        .run(&pipelines::upgrade_comptroller())
        .await;

    assert!(report.is_success(), "{report}");
    let after = harness.persisted()?.get(&keys::comptroller())?;
    assert_ne!(before, after);
    assert_eq!(harness.gateway.deploys_of("Comptroller"), vec![before, after]);
    assert_eq!(harness.gateway.calls_to("_become").len(), 2);
    Ok(())
}
