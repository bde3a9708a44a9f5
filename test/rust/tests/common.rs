use std::{path::PathBuf, sync::Arc, time::Duration};

use deployment_ledger::Ledger;
use ethers::signers::Signer;
use eyre::Result;
use lending_deployer::{
    config::ExecutionOptions,
    constants::ALICE,
    mock::{MockGateway, MockVerifier},
    Orchestrator,
};
use tempfile::TempDir;

/// A mock chain, a mock explorer, and a ledger persisted to a temporary
/// directory.
pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub verifier: Arc<MockVerifier>,
    pub ledger: Arc<Ledger>,
    pub options: ExecutionOptions,
    dir: TempDir,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = tempfile::tempdir()?;
        let ledger = Arc::new(Ledger::load(dir.path().join("localhost.json"))?);
        Ok(Self {
            gateway: Arc::new(MockGateway::new(ALICE.address())),
            verifier: Arc::new(MockVerifier::new()),
            ledger,
            options: ExecutionOptions {
                confirmations: 1,
                confirmation_timeout: Duration::from_millis(100),
                check_live_price: false,
            },
            dir,
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("localhost.json")
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.gateway.clone(), self.ledger.clone(), self.options.clone())
            .with_verifier(self.verifier.clone())
    }

    /// Simulates a restart: a new ledger loaded from what was persisted.
    pub fn restart(&mut self) -> Result<()> {
        self.ledger = Arc::new(Ledger::load(self.ledger_path())?);
        Ok(())
    }

    /// The ledger as it is on disk.
    pub fn persisted(&self) -> Result<Ledger> {
        Ok(Ledger::load(self.ledger_path())?)
    }
}
