use async_trait::async_trait;
use deployment_ledger::LedgerKey;
use ethers::{
    abi::Token,
    types::{Address, U256},
};
use lending_params::ControllerParams;
use tracing::info;

use super::apply_setting;
use crate::{
    errors::DeployError,
    executor::StepExecutor,
    keys,
    orchestrator::Step,
    solidity::{
        BECOME, CLOSE_FACTOR, COMPOUND_LENS, COMPTROLLER, COMPTROLLER_IMPLEMENTATION,
        LIQUIDATION_INCENTIVE, MAX_ASSETS, MOCK_PRICE_ORACLE, SET_CLOSE_FACTOR,
        SET_LIQUIDATION_INCENTIVE, SET_MAX_ASSETS, SET_PENDING_IMPLEMENTATION, SET_PRICE_ORACLE,
        UNITROLLER,
    },
};

pub struct DeployMockOracle;

#[async_trait]
impl Step for DeployMockOracle {
    fn id(&self) -> String {
        "deploy-mock-oracle".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::mock_price_oracle()]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        executor
            .deploy(keys::mock_price_oracle(), &MOCK_PRICE_ORACLE, vec![])
            .await?;
        Ok(())
    }
}

/// Deploys the controller proxy. It stays put across upgrades.
pub struct DeployUnitroller;

#[async_trait]
impl Step for DeployUnitroller {
    fn id(&self) -> String {
        "deploy-unitroller".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::unitroller()]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        executor.deploy(keys::unitroller(), &UNITROLLER, vec![]).await?;
        Ok(())
    }
}

/// Deploys the controller logic and has the proxy adopt it.
///
/// The logic contract is recorded as pending until the handshake is
/// confirmed, so nothing can resolve `Comptroller` to an unadopted
/// implementation.
pub struct AdoptComptroller;

#[async_trait]
impl Step for AdoptComptroller {
    fn id(&self) -> String {
        "adopt-comptroller".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![keys::unitroller()]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::comptroller()]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let logic = executor
            .deploy(keys::pending_comptroller(), &COMPTROLLER, vec![])
            .await?;
        adopt(executor, unitroller, logic).await?;
        executor.record(&keys::comptroller(), logic)?;
        executor.ledger().remove(&keys::pending_comptroller())?;
        Ok(())
    }
}

/// Swaps the logic behind an existing proxy for a freshly deployed one.
pub struct UpgradeComptroller;

#[async_trait]
impl Step for UpgradeComptroller {
    fn id(&self) -> String {
        "upgrade-comptroller".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![keys::unitroller(), keys::comptroller()]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let logic = executor
            .deploy(keys::pending_comptroller(), &COMPTROLLER, vec![])
            .await?;
        adopt(executor, unitroller, logic).await?;
        let previous = executor.ledger().replace(&keys::comptroller(), logic)?;
        executor.ledger().remove(&keys::pending_comptroller())?;
        info!(?previous, new = ?logic, "comptroller upgraded");
        Ok(())
    }
}

/// Nominates `logic` on the proxy and has it accept, unless the proxy
/// already points at it.
async fn adopt(executor: &StepExecutor, unitroller: Address, logic: Address) -> Result<(), DeployError> {
    let current = executor
        .read_address(unitroller, COMPTROLLER_IMPLEMENTATION, vec![])
        .await?;
    if current == logic {
        info!(?unitroller, ?logic, "implementation already adopted");
        return Ok(());
    }

    executor
        .call(unitroller, SET_PENDING_IMPLEMENTATION, vec![Token::Address(logic)])
        .await?;
    executor
        .call(logic, BECOME, vec![Token::Address(unitroller)])
        .await?;

    let adopted = executor
        .read_address(unitroller, COMPTROLLER_IMPLEMENTATION, vec![])
        .await?;
    if adopted != logic {
        return Err(DeployError::UnexpectedState(format!(
            "proxy {unitroller:#x} points at {adopted:#x} instead of {logic:#x}"
        )));
    }
    Ok(())
}

/// Applies the controller's risk parameters through the proxy.
///
/// The step produces nothing, so it runs on every pass; each parameter is
/// compared with the chain and only changed ones are sent. The ledger entry
/// under `Configuration/Controller` records which proxy was configured.
pub struct ConfigureController {
    params: ControllerParams,
}

impl ConfigureController {
    pub fn new(params: ControllerParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Step for ConfigureController {
    fn id(&self) -> String {
        "configure-controller".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![keys::unitroller(), keys::comptroller()]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let settings = [
            (MAX_ASSETS, SET_MAX_ASSETS, U256::from(self.params.max_assets)),
            (CLOSE_FACTOR, SET_CLOSE_FACTOR, self.params.close_factor_mantissa()?),
            (
                LIQUIDATION_INCENTIVE,
                SET_LIQUIDATION_INCENTIVE,
                self.params.liquidation_incentive_mantissa()?,
            ),
        ];
        for (getter, setter, desired) in settings {
            let current = executor.read_uint(unitroller, getter, vec![]).await?;
            apply_setting(
                executor,
                unitroller,
                setter,
                vec![Token::Uint(desired)],
                current,
                desired,
            )
            .await?;
        }
        executor.record(&keys::controller_config(), unitroller)
    }
}

/// Points the controller at a price oracle: the configured one, or the
/// mock deployed earlier in the run.
pub struct SetPriceOracle {
    oracle: Option<Address>,
}

impl SetPriceOracle {
    pub fn new(oracle: Option<Address>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Step for SetPriceOracle {
    fn id(&self) -> String {
        "set-price-oracle".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        let mut deps = vec![keys::unitroller(), keys::comptroller()];
        if self.oracle.is_none() {
            deps.push(keys::mock_price_oracle());
        }
        deps
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::price_oracle()]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => executor.address(&keys::mock_price_oracle())?,
        };
        executor
            .call(unitroller, SET_PRICE_ORACLE, vec![Token::Address(oracle)])
            .await?;
        executor.record(&keys::price_oracle(), oracle)
    }
}

pub struct DeployLens;

#[async_trait]
impl Step for DeployLens {
    fn id(&self) -> String {
        "deploy-lens".into()
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::compound_lens()]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        executor
            .deploy(keys::compound_lens(), &COMPOUND_LENS, vec![])
            .await?;
        Ok(())
    }
}
