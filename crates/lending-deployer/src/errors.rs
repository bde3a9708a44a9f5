use std::{fmt::Display, time::Duration};

use deployment_ledger::{LedgerError, LedgerKey};
use ethers::types::H256;
use lending_params::ParamError;

/// Everything that can stop a deployment run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Bad parameters, caught before anything is submitted.
    #[error("invalid parameters: {0}")]
    Validation(#[from] ParamError),
    #[error("missing dependency: no address recorded at `{0}`")]
    MissingDependency(LedgerKey),
    #[error("transaction for {context} failed: {reason}")]
    ChainSubmission { context: String, reason: String },
    /// The transaction was not mined and confirmed before the deadline.
    /// `tx_hash` is `None` when the submission itself never returned.
    #[error("timed out after {timeout:?} waiting for {confirmations} confirmations of {context}")]
    ConfirmationTimeout {
        context: String,
        tx_hash: Option<H256>,
        confirmations: usize,
        timeout: Duration,
    },
    /// The chain disagrees with what a step expected to find there.
    #[error("unexpected on-chain state: {0}")]
    UnexpectedState(String),
    #[error(transparent)]
    Ledger(LedgerError),
    #[error("failed to load artifact for {contract}: {reason}")]
    Artifact { contract: String, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl DeployError {
    pub fn submission(context: impl Display, reason: impl Display) -> Self {
        Self::ChainSubmission {
            context: context.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<LedgerError> for DeployError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::MissingDependency(key) => Self::MissingDependency(key),
            other => Self::Ledger(other),
        }
    }
}

/// A failed attempt at source verification. These never fail a step; they
/// are reported as warnings.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("verification request failed: {0}")]
    Request(String),
    #[error("explorer rejected verification: {0}")]
    Rejected(String),
    #[error("verification still pending after {0} status checks")]
    Pending(usize),
    #[error("no build info for {0}")]
    BuildInfo(String),
}
