//! The deployment and configuration steps of the lending protocol.

mod controller;
mod markets;
mod rate_models;

pub use controller::{
    AdoptComptroller, ConfigureController, DeployLens, DeployMockOracle, DeployUnitroller,
    SetPriceOracle, UpgradeComptroller,
};
pub use markets::{DeployMarket, ListMarket, SetCollateralFactor, SetMockPrice};
pub use rate_models::DeployRateModel;

use ethers::{
    abi::Token,
    types::{Address, U256},
};
use tracing::info;

use crate::{
    errors::DeployError,
    executor::StepExecutor,
    solidity::{function_name, DECIMALS},
};

/// Reads an ERC20's `decimals()`.
async fn token_decimals(executor: &StepExecutor, token: Address) -> Result<u8, DeployError> {
    let decimals = executor.read_uint(token, DECIMALS, vec![]).await?;
    u8::try_from(decimals).map_err(|_| {
        DeployError::UnexpectedState(format!("token {token:#x} reports {decimals} decimals"))
    })
}

/// Calls `setter` with `args` unless the chain already holds `desired`.
/// Configuration steps go through here, so they can run on every pass
/// and only submit what changed.
async fn apply_setting(
    executor: &StepExecutor,
    contract: Address,
    setter: &str,
    args: Vec<Token>,
    current: U256,
    desired: U256,
) -> Result<(), DeployError> {
    let function = function_name(setter);
    if current == desired {
        info!(step = executor.step(), function, %current, "already applied");
        return Ok(());
    }
    info!(step = executor.step(), function, from = %current, to = %desired, "applying");
    executor.call(contract, setter, args).await?;
    Ok(())
}
