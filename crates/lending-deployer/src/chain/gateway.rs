use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::{Function, HumanReadableParser, Token},
    contract::ContractFactory,
    providers::{Middleware, PendingTransaction},
    types::{
        transaction::eip2718::TypedTransaction, Address, TransactionReceipt, TransactionRequest,
        H256, U64,
    },
};
use tracing::debug;

use crate::{
    artifacts::{ArtifactStore, ContractRef},
    constants::POLL_INTERVAL,
    errors::DeployError,
    gateway::{ChainGateway, Confirmation, PendingTx},
    solidity::function_name,
};

/// A gateway backed by an ethers middleware stack and compiled Hardhat
/// artifacts.
///
/// Transactions are sent as legacy transactions so the gas escalator can
/// reprice them.
#[derive(Debug)]
pub struct EthersGateway<M> {
    client: Arc<M>,
    sender: Address,
    artifacts: ArtifactStore,
}

impl<M: Middleware + 'static> EthersGateway<M> {
    pub fn new(client: Arc<M>, sender: Address, artifacts: ArtifactStore) -> Self {
        Self {
            client,
            sender,
            artifacts,
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainGateway for EthersGateway<M> {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn deploy_contract(
        &self,
        contract: &ContractRef,
        args: Vec<Token>,
    ) -> Result<(Address, PendingTx), DeployError> {
        let artifact = self.artifacts.load(contract)?;
        let factory = ContractFactory::new(artifact.abi, artifact.bytecode, self.client.clone());
        let (_, receipt) = factory
            .deploy_tokens(args)
            .map_err(|e| DeployError::submission(contract, e))?
            .legacy()
            .send_with_receipt()
            .await
            .map_err(|e| DeployError::submission(contract, e))?;
        check_status(&receipt, contract)?;
        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::submission(contract, "receipt has no contract address"))?;
        debug!(%contract, ?address, tx_hash = ?receipt.transaction_hash, "deployment mined");
        Ok((
            address,
            PendingTx {
                hash: receipt.transaction_hash,
            },
        ))
    }

    async fn call(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<PendingTx, DeployError> {
        let context = format!("{} on {contract:#x}", function_name(signature));
        let tx = self.request(contract, signature, &args)?;
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| DeployError::submission(&context, e))?;
        debug!(%context, tx_hash = ?pending.tx_hash(), "call submitted");
        Ok(PendingTx {
            hash: pending.tx_hash(),
        })
    }

    async fn wait_confirmations(
        &self,
        pending: &PendingTx,
        confirmations: usize,
    ) -> Result<Confirmation, DeployError> {
        let context = format!("{:#x}", pending.hash);
        let receipt = PendingTransaction::new(pending.hash, self.client.provider())
            .interval(*POLL_INTERVAL)
            .confirmations(confirmations)
            .await
            .map_err(|e| DeployError::submission(&context, e))?
            .ok_or_else(|| DeployError::submission(&context, "dropped from the mempool"))?;
        check_status(&receipt, &context)?;
        Ok(Confirmation {
            tx_hash: pending.hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            confirmations,
        })
    }

    async fn read_state(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, DeployError> {
        let function = parse_function(signature)?;
        let tx: TypedTransaction = self.request(contract, signature, &args)?.into();
        let output = self.client.call(&tx, None).await.map_err(|e| {
            DeployError::UnexpectedState(format!(
                "{} on {contract:#x} failed: {e}",
                function.name
            ))
        })?;
        function.decode_output(&output).map_err(|e| {
            DeployError::UnexpectedState(format!(
                "{} on {contract:#x} returned undecodable data: {e}",
                function.name
            ))
        })
    }
}

impl<M: Middleware + 'static> EthersGateway<M> {
    fn request(
        &self,
        contract: Address,
        signature: &str,
        args: &[Token],
    ) -> Result<TransactionRequest, DeployError> {
        let function = parse_function(signature)?;
        let data = function.encode_input(args).map_err(|e| {
            DeployError::submission(format!("{} on {contract:#x}", function.name), e)
        })?;
        Ok(TransactionRequest::new()
            .from(self.sender)
            .to(contract)
            .data(data))
    }
}

fn parse_function(signature: &str) -> Result<Function, DeployError> {
    HumanReadableParser::parse_function(signature)
        .map_err(|e| DeployError::Config(format!("bad function signature `{signature}`: {e}")))
}

fn check_status(receipt: &TransactionReceipt, context: impl std::fmt::Display) -> Result<(), DeployError> {
    if receipt.status == Some(U64::one()) {
        return Ok(());
    }
    let hash: H256 = receipt.transaction_hash;
    Err(DeployError::submission(
        context,
        format!("transaction {hash:#x} reverted"),
    ))
}
