//! In-memory stand-ins for the chain and the block explorer.
//!
//! The mock gateway simulates just enough of the protocol's contracts for
//! the deployment pipelines to run: the proxy handshake, oracle selection
//! and mock prices. Failures can be injected per contract or function.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::{Address, H256, U256},
};
use lending_params::DEFAULT_BLOCKS_PER_YEAR;

use crate::{
    artifacts::ContractRef,
    errors::{DeployError, VerificationError},
    gateway::{ChainGateway, Confirmation, PendingTx},
    solidity::function_name,
    verifier::Verifier,
};

#[derive(Clone, Debug, PartialEq)]
pub enum MockTx {
    Deploy {
        contract: String,
        address: Address,
        args: Vec<Token>,
        hash: H256,
    },
    Call {
        contract: Address,
        function: String,
        args: Vec<Token>,
        hash: H256,
    },
}

impl MockTx {
    pub fn hash(&self) -> H256 {
        match self {
            MockTx::Deploy { hash, .. } | MockTx::Call { hash, .. } => *hash,
        }
    }
}

#[derive(Default)]
struct MockState {
    nonce: u64,
    block: u64,
    transactions: Vec<MockTx>,
    storage: HashMap<(Address, String), Vec<Token>>,
    pending_implementations: HashMap<Address, Address>,
    failing: HashSet<String>,
    stalled: HashSet<String>,
    hanging: HashSet<String>,
    stalled_hashes: HashSet<H256>,
    error_codes: HashMap<String, U256>,
}

impl MockState {
    fn next(&mut self) -> (Address, H256) {
        self.nonce += 1;
        (
            Address::from_low_u64_be(0x1000 + self.nonce),
            H256::from_low_u64_be(self.nonce),
        )
    }

    fn store(&mut self, contract: Address, function: &str, args: &[Token], output: Vec<Token>) {
        self.storage.insert(storage_key(contract, function, args), output);
    }
}

fn storage_key(contract: Address, function: &str, args: &[Token]) -> (Address, String) {
    (contract, format!("{function}{args:?}"))
}

pub struct MockGateway {
    sender: Address,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            state: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes deployments of the contract `name`, or calls to the function
    /// `name`, fail at submission.
    pub fn fail(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    /// Like `fail`, but the transaction is submitted and never confirms.
    pub fn stall(&self, name: &str) {
        self.lock().stalled.insert(name.to_string());
    }

    /// Like `stall`, but the submission itself never returns.
    pub fn hang(&self, name: &str) {
        self.lock().hanging.insert(name.to_string());
    }

    /// Clears the failures injected for `name`. Transactions that already
    /// stalled stay stalled.
    pub fn recover(&self, name: &str) {
        let mut state = self.lock();
        state.failing.remove(name);
        state.stalled.remove(name);
        state.hanging.remove(name);
        state.error_codes.remove(name);
    }

    /// Makes the simulation of an error code returning function report
    /// `code`.
    pub fn reject_with_code(&self, function: &str, code: u64) {
        self.lock()
            .error_codes
            .insert(function.to_string(), U256::from(code));
    }

    /// Overrides what a view function returns.
    pub fn set_state(&self, contract: Address, function: &str, args: Vec<Token>, output: Vec<Token>) {
        self.lock().store(contract, function, &args, output);
    }

    pub fn transactions(&self) -> Vec<MockTx> {
        self.lock().transactions.clone()
    }

    /// The addresses `contract` was deployed at, in order.
    pub fn deploys_of(&self, contract: &str) -> Vec<Address> {
        self.lock()
            .transactions
            .iter()
            .filter_map(|tx| match tx {
                MockTx::Deploy {
                    contract: name,
                    address,
                    ..
                } if name == contract => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// The calls made to `function`, with their target and arguments.
    pub fn calls_to(&self, function: &str) -> Vec<(Address, Vec<Token>)> {
        self.lock()
            .transactions
            .iter()
            .filter_map(|tx| match tx {
                MockTx::Call {
                    contract,
                    function: name,
                    args,
                    ..
                } if name == function => Some((*contract, args.clone())),
                _ => None,
            })
            .collect()
    }

    /// Applies the state changes of the protocol functions the deployer
    /// relies on.
    fn apply(state: &mut MockState, contract: Address, function: &str, args: &[Token]) {
        match (function, args) {
            ("_setPendingImplementation", [Token::Address(logic)]) => {
                state.pending_implementations.insert(contract, *logic);
            }
            ("_become", [Token::Address(unitroller)]) => {
                if state.pending_implementations.get(unitroller) == Some(&contract) {
                    state.pending_implementations.remove(unitroller);
                    state.store(
                        *unitroller,
                        "comptrollerImplementation",
                        &[],
                        vec![Token::Address(contract)],
                    );
                }
            }
            ("_setMaxAssets", [value]) => {
                state.store(contract, "maxAssets", &[], vec![value.clone()]);
            }
            ("_setCloseFactor", [value]) => {
                state.store(contract, "closeFactorMantissa", &[], vec![value.clone()]);
            }
            ("_setLiquidationIncentive", [value]) => {
                state.store(contract, "liquidationIncentiveMantissa", &[], vec![value.clone()]);
            }
            ("_supportMarket", [market]) => {
                state.store(
                    contract,
                    "markets",
                    &[market.clone()],
                    vec![Token::Bool(true), Token::Uint(U256::zero()), Token::Bool(false)],
                );
            }
            ("_setCollateralFactor", [market, factor]) => {
                state.store(
                    contract,
                    "markets",
                    &[market.clone()],
                    vec![Token::Bool(true), factor.clone(), Token::Bool(false)],
                );
            }
            ("_setPriceOracle", [Token::Address(oracle)]) => {
                state.store(contract, "oracle", &[], vec![Token::Address(*oracle)]);
            }
            ("mockUpdatePrice", [market, price]) => {
                state.store(
                    contract,
                    "getUnderlyingPrice",
                    &[market.clone()],
                    vec![price.clone()],
                );
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn deploy_contract(
        &self,
        contract: &ContractRef,
        args: Vec<Token>,
    ) -> Result<(Address, PendingTx), DeployError> {
        let hanging = self.lock().hanging.contains(contract.name);
        if hanging {
            futures::future::pending::<()>().await;
        }
        let mut state = self.lock();
        if state.failing.contains(contract.name) {
            return Err(DeployError::submission(contract, "execution reverted"));
        }
        let (address, hash) = state.next();
        if state.stalled.contains(contract.name) {
            state.stalled_hashes.insert(hash);
        }
        state.transactions.push(MockTx::Deploy {
            contract: contract.name.to_string(),
            address,
            args,
            hash,
        });
        Ok((address, PendingTx { hash }))
    }

    async fn call(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<PendingTx, DeployError> {
        let function = function_name(signature);
        let hanging = self.lock().hanging.contains(function);
        if hanging {
            futures::future::pending::<()>().await;
        }
        let mut state = self.lock();
        if state.failing.contains(function) {
            return Err(DeployError::submission(
                format!("{function} on {contract:#x}"),
                "execution reverted",
            ));
        }
        let (_, hash) = state.next();
        if state.stalled.contains(function) {
            state.stalled_hashes.insert(hash);
        } else {
            Self::apply(&mut state, contract, function, &args);
        }
        state.transactions.push(MockTx::Call {
            contract,
            function: function.to_string(),
            args,
            hash,
        });
        Ok(PendingTx { hash })
    }

    async fn wait_confirmations(
        &self,
        pending: &PendingTx,
        confirmations: usize,
    ) -> Result<Confirmation, DeployError> {
        let stalled = {
            let mut state = self.lock();
            state.block += 1;
            state.stalled_hashes.contains(&pending.hash)
        };
        if stalled {
            futures::future::pending::<()>().await;
        }
        Ok(Confirmation {
            tx_hash: pending.hash,
            block_number: Some(self.lock().block),
            confirmations,
        })
    }

    async fn read_state(
        &self,
        contract: Address,
        signature: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, DeployError> {
        let function = function_name(signature);
        let state = self.lock();
        if let Some(output) = state.storage.get(&storage_key(contract, function, &args)) {
            return Ok(output.clone());
        }
        if function == "markets" {
            return Ok(vec![Token::Bool(false), Token::Uint(U256::zero()), Token::Bool(false)]);
        }
        let output = match function {
            "decimals" => Token::Uint(18.into()),
            "blocksPerYear" => Token::Uint(DEFAULT_BLOCKS_PER_YEAR.into()),
            "comptrollerImplementation" | "oracle" => Token::Address(Address::zero()),
            "getUnderlyingPrice" | "maxAssets" | "closeFactorMantissa"
            | "liquidationIncentiveMantissa" => Token::Uint(U256::zero()),
            f if f.starts_with('_') => {
                Token::Uint(state.error_codes.get(f).copied().unwrap_or_default())
            }
            f => {
                return Err(DeployError::UnexpectedState(format!(
                    "mock has no state for {f} on {contract:#x}"
                )))
            }
        };
        Ok(vec![output])
    }
}

/// A verifier that accepts everything except the contracts it was told to
/// reject.
#[derive(Default)]
pub struct MockVerifier {
    rejected: Mutex<HashSet<String>>,
    verified: Mutex<Vec<(Address, String)>>,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, contract: &str) {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contract.to_string());
    }

    /// Every contract that was verified, with its fully qualified name.
    pub fn verified(&self) -> Vec<(Address, String)> {
        self.verified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn verify(
        &self,
        address: Address,
        contract: &ContractRef,
        _constructor_args: &[Token],
    ) -> Result<(), VerificationError> {
        let rejected = self
            .rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(contract.name);
        if rejected {
            return Err(VerificationError::Rejected(format!(
                "Fail - Unable to verify {contract}"
            )));
        }
        self.verified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((address, contract.fully_qualified_name()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eyre::Result;

    use super::*;
    use crate::solidity::{BECOME, COMPTROLLER_IMPLEMENTATION, SET_PENDING_IMPLEMENTATION};

    #[tokio::test]
    async fn test_handshake_requires_both_halves() -> Result<()> {
        let gateway = MockGateway::new(Address::repeat_byte(0xaa));
        let proxy = Address::repeat_byte(1);
        let logic = Address::repeat_byte(2);

        gateway
            .call(logic, BECOME, vec![Token::Address(proxy)])
            .await?;
        let implementation = gateway
            .read_state(proxy, COMPTROLLER_IMPLEMENTATION, vec![])
            .await?;
        assert_eq!(implementation, vec![Token::Address(Address::zero())]);

        gateway
            .call(proxy, SET_PENDING_IMPLEMENTATION, vec![Token::Address(logic)])
            .await?;
        gateway
            .call(logic, BECOME, vec![Token::Address(proxy)])
            .await?;
        let implementation = gateway
            .read_state(proxy, COMPTROLLER_IMPLEMENTATION, vec![])
            .await?;
        assert_eq!(implementation, vec![Token::Address(logic)]);
        assert_eq!(gateway.calls_to("_become").len(), 2);
        Ok(())
    }
}
