use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::{Address, H256},
};

use crate::{artifacts::ContractRef, errors::DeployError};

/// A submitted transaction that has not yet been confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingTx {
    pub hash: H256,
}

/// A transaction that reached the requested confirmation depth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub confirmations: usize,
}

/// The slice of a chain client the deployer needs.
///
/// Methods are addressed by their human readable signature, e.g.
/// `function _supportMarket(address cToken) returns (uint256)`.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// The account transactions are sent from.
    fn sender(&self) -> Address;

    /// Submits a deployment and returns once it is mined.
    async fn deploy_contract(
        &self,
        contract: &ContractRef,
        args: Vec<Token>,
    ) -> Result<(Address, PendingTx), DeployError>;

    async fn call(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<PendingTx, DeployError>;

    /// Resolves once `pending` has `confirmations` blocks on top of (and
    /// including) its inclusion block. A reverted transaction is an error.
    async fn wait_confirmations(
        &self,
        pending: &PendingTx,
        confirmations: usize,
    ) -> Result<Confirmation, DeployError>;

    async fn read_state(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, DeployError>;
}
