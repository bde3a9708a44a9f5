use std::{fmt, future::Future, sync::Arc};

use deployment_ledger::{Ledger, LedgerKey};
use ethers::{
    abi::Token,
    types::{Address, H256, U256},
};
use tokio::{
    sync::mpsc::UnboundedSender,
    time::{timeout_at, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    artifacts::ContractRef,
    config::ExecutionOptions,
    errors::{DeployError, VerificationError},
    gateway::{ChainGateway, Confirmation, PendingTx},
    solidity::{function_name, returns_error_code},
    verifier::Verifier,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationStatus {
    /// No verifier is configured.
    Unverified,
    Verified,
    VerificationFailed(String),
}

/// A contract deployed by a step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedComponent {
    pub key: LedgerKey,
    pub contract: &'static str,
    pub address: Address,
    pub tx_hash: H256,
    pub confirmations: usize,
    pub verification: VerificationStatus,
}

/// Problems that don't stop a run but that the operator should see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeployWarning {
    VerificationFailed {
        step: String,
        key: LedgerKey,
        address: Address,
        error: VerificationError,
    },
}

impl fmt::Display for DeployWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployWarning::VerificationFailed {
                step,
                key,
                address,
                error,
            } => write!(f, "{step}: verification of {key} at {address:#x} failed: {error}"),
        }
    }
}

/// The collaborators shared by every step of a run.
#[derive(Clone)]
pub struct ExecutionContext {
    pub gateway: Arc<dyn ChainGateway>,
    pub verifier: Option<Arc<dyn Verifier>>,
    pub ledger: Arc<Ledger>,
    pub options: ExecutionOptions,
}

/// Runs the transactions of a single step: submit, wait for finality,
/// record in the ledger, then verify.
pub struct StepExecutor {
    step: String,
    ctx: ExecutionContext,
    warnings: UnboundedSender<DeployWarning>,
    components: std::sync::Mutex<Vec<DeployedComponent>>,
}

impl StepExecutor {
    pub fn new(step: impl Into<String>, ctx: ExecutionContext, warnings: UnboundedSender<DeployWarning>) -> Self {
        Self {
            step: step.into(),
            ctx,
            warnings,
            components: Default::default(),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ctx.ledger
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.ctx.options
    }

    /// The account transactions are sent from.
    pub fn sender(&self) -> Address {
        self.ctx.gateway.sender()
    }

    /// Resolves a dependency from the ledger.
    pub fn address(&self, key: &LedgerKey) -> Result<Address, DeployError> {
        Ok(self.ctx.ledger.get(key)?)
    }

    /// Records a configuration outcome that has no deployment of its own.
    pub fn record(&self, key: &LedgerKey, address: Address) -> Result<(), DeployError> {
        self.ctx.ledger.set(key, address)?;
        info!(step = %self.step, %key, ?address, "recorded");
        Ok(())
    }

    /// Deploys `contract` and records it at `key`. An address already
    /// recorded at `key` is reused without touching the chain.
    pub async fn deploy(
        &self,
        key: LedgerKey,
        contract: &ContractRef,
        args: Vec<Token>,
    ) -> Result<Address, DeployError> {
        if let Some(address) = self.ctx.ledger.try_get(&key)? {
            info!(step = %self.step, %key, ?address, "reusing recorded deployment");
            return Ok(address);
        }

        info!(step = %self.step, %key, %contract, "deploying");
        let deadline = self.deadline();
        let submission = self.ctx.gateway.deploy_contract(contract, args.clone());
        let (address, pending) = self.before(deadline, contract.name, None, submission).await?;
        let confirmation = self.confirm(&pending, contract.name, deadline).await?;
        self.ctx.ledger.set(&key, address)?;
        info!(step = %self.step, %key, ?address, tx_hash = ?pending.hash, "deployed");

        let verification = self.verify(&key, address, contract, &args).await;
        self.components
            .lock()
            .map_err(|_| DeployError::UnexpectedState("component list poisoned".into()))?
            .push(DeployedComponent {
                key,
                contract: contract.name,
                address,
                tx_hash: pending.hash,
                confirmations: confirmation.confirmations,
                verification,
            });
        Ok(address)
    }

    /// Sends a transaction to `contract` and waits for it to be final.
    ///
    /// Functions that report failure through an error code are simulated
    /// first so a rejected call is never submitted.
    pub async fn call(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<Confirmation, DeployError> {
        let name = function_name(signature);
        let deadline = self.deadline();
        if returns_error_code(signature) {
            let simulation = self.ctx.gateway.read_state(contract, signature, args.clone());
            let output = self.before(deadline, name, None, simulation).await?;
            if let Some(Token::Uint(code)) = output.first() {
                if !code.is_zero() {
                    return Err(DeployError::submission(
                        format!("{name} on {contract:#x}"),
                        format!("simulation returned error code {code}"),
                    ));
                }
            }
        }

        info!(step = %self.step, function = name, ?contract, "calling");
        let submission = self.ctx.gateway.call(contract, signature, args);
        let pending = self.before(deadline, name, None, submission).await?;
        self.confirm(&pending, name, deadline).await
    }

    pub async fn read(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, DeployError> {
        self.ctx.gateway.read_state(contract, signature, args).await
    }

    pub async fn read_address(&self, contract: Address, signature: &str, args: Vec<Token>) -> Result<Address, DeployError> {
        match self.read(contract, signature, args).await?.first() {
            Some(Token::Address(address)) => Ok(*address),
            other => Err(unexpected_output(signature, other)),
        }
    }

    pub async fn read_uint(&self, contract: Address, signature: &str, args: Vec<Token>) -> Result<U256, DeployError> {
        match self.read(contract, signature, args).await?.first() {
            Some(Token::Uint(value)) => Ok(*value),
            other => Err(unexpected_output(signature, other)),
        }
    }

    /// The components deployed by this step, in deployment order.
    pub fn into_components(self) -> Vec<DeployedComponent> {
        self.components.into_inner().unwrap_or_default()
    }

    /// Submission, mining and confirmation of one transaction share a
    /// single `confirmation_timeout`.
    fn deadline(&self) -> Instant {
        Instant::now() + self.ctx.options.confirmation_timeout
    }

    async fn before<T>(
        &self,
        deadline: Instant,
        what: &str,
        tx_hash: Option<H256>,
        work: impl Future<Output = Result<T, DeployError>>,
    ) -> Result<T, DeployError> {
        timeout_at(deadline, work)
            .await
            .map_err(|_| DeployError::ConfirmationTimeout {
                context: what.to_string(),
                tx_hash,
                confirmations: self.ctx.options.confirmations,
                timeout: self.ctx.options.confirmation_timeout,
            })?
    }

    async fn confirm(
        &self,
        pending: &PendingTx,
        what: &str,
        deadline: Instant,
    ) -> Result<Confirmation, DeployError> {
        let confirmations = self.ctx.options.confirmations;
        let wait = self.ctx.gateway.wait_confirmations(pending, confirmations);
        let confirmation = self.before(deadline, what, Some(pending.hash), wait).await?;
        info!(
            step = %self.step,
            what,
            tx_hash = ?pending.hash,
            block = ?confirmation.block_number,
            confirmations,
            "confirmed"
        );
        Ok(confirmation)
    }

    async fn verify(
        &self,
        key: &LedgerKey,
        address: Address,
        contract: &ContractRef,
        args: &[Token],
    ) -> VerificationStatus {
        let Some(verifier) = &self.ctx.verifier else {
            return VerificationStatus::Unverified;
        };
        match verifier.verify(address, contract, args).await {
            Ok(()) => VerificationStatus::Verified,
            Err(error) => {
                warn!(step = %self.step, %key, ?address, %error, "verification failed");
                let status = VerificationStatus::VerificationFailed(error.to_string());
                let warning = DeployWarning::VerificationFailed {
                    step: self.step.clone(),
                    key: key.clone(),
                    address,
                    error,
                };
                if self.warnings.send(warning).is_err() {
                    debug!(step = %self.step, %key, "warning receiver closed");
                }
                status
            }
        }
    }
}

fn unexpected_output(signature: &str, output: Option<&Token>) -> DeployError {
    DeployError::UnexpectedState(format!(
        "{} returned {output:?}",
        function_name(signature)
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eyre::Result;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{
        keys,
        mock::{MockGateway, MockVerifier},
        solidity::{SUPPORT_MARKET, UNITROLLER},
    };

    #[tokio::test]
    async fn test_verification_failure_without_listener() -> Result<()> {
        let verifier = Arc::new(MockVerifier::new());
        verifier.fail_for("Unitroller");
        let ledger = Arc::new(Ledger::in_memory());
        let ctx = ExecutionContext {
            gateway: Arc::new(MockGateway::new(Address::repeat_byte(0xaa))),
            verifier: Some(verifier),
            ledger: ledger.clone(),
            options: ExecutionOptions::default(),
        };
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let executor = StepExecutor::new("deploy-unitroller", ctx, tx);

        let address = executor.deploy(keys::unitroller(), &UNITROLLER, vec![]).await?;

        assert_eq!(ledger.get(&keys::unitroller())?, address);
        let components = executor.into_components();
        assert_eq!(components.len(), 1);
        assert!(matches!(
            &components[0].verification,
            VerificationStatus::VerificationFailed(reason) if reason.contains("Unitroller")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_hung_submission_times_out() -> Result<()> {
        let gateway = Arc::new(MockGateway::new(Address::repeat_byte(0xaa)));
        gateway.hang("_supportMarket");
        let ctx = ExecutionContext {
            gateway: gateway.clone(),
            verifier: None,
            ledger: Arc::new(Ledger::in_memory()),
            options: ExecutionOptions {
                confirmation_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        };
        let (tx, _rx) = unbounded_channel();
        let executor = StepExecutor::new("list-market:tMetis", ctx, tx);

        let result = executor
            .call(
                Address::repeat_byte(1),
                SUPPORT_MARKET,
                vec![Token::Address(Address::repeat_byte(2))],
            )
            .await;

        assert!(matches!(
            result,
            Err(DeployError::ConfirmationTimeout { tx_hash: None, ref context, .. })
                if context == "_supportMarket"
        ));
        assert!(gateway.transactions().is_empty());
        Ok(())
    }
}
