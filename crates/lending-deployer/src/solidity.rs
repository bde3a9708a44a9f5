//! The protocol contracts and the entry points the deployer touches, in
//! human readable ABI form.

use crate::artifacts::ContractRef;

/// Contracts ///

pub const UNITROLLER: ContractRef = ContractRef::new("contracts/Unitroller.sol", "Unitroller");
pub const COMPTROLLER: ContractRef = ContractRef::new("contracts/Comptroller.sol", "Comptroller");
pub const MOCK_PRICE_ORACLE: ContractRef =
    ContractRef::new("contracts/MockPriceOracle.sol", "MockPriceOracle");
pub const COMPOUND_LENS: ContractRef =
    ContractRef::new("contracts/Lens/CompoundLens.sol", "CompoundLens");
pub const WHITE_PAPER_MODEL: ContractRef = ContractRef::new(
    "contracts/WhitePaperInterestRateModel.sol",
    "WhitePaperInterestRateModel",
);
pub const JUMP_RATE_MODEL_V2: ContractRef =
    ContractRef::new("contracts/JumpRateModelV2.sol", "JumpRateModelV2");
pub const CERC20_IMMUTABLE: ContractRef =
    ContractRef::new("contracts/CErc20Immutable.sol", "CErc20Immutable");

/// Unitroller ///

pub const SET_PENDING_IMPLEMENTATION: &str =
    "function _setPendingImplementation(address newPendingImplementation) returns (uint256)";
pub const COMPTROLLER_IMPLEMENTATION: &str =
    "function comptrollerImplementation() view returns (address)";

/// Comptroller ///

pub const BECOME: &str = "function _become(address unitroller)";
pub const SET_MAX_ASSETS: &str = "function _setMaxAssets(uint256 newMaxAssets) returns (uint256)";
pub const SET_CLOSE_FACTOR: &str =
    "function _setCloseFactor(uint256 newCloseFactorMantissa) returns (uint256)";
pub const SET_LIQUIDATION_INCENTIVE: &str =
    "function _setLiquidationIncentive(uint256 newLiquidationIncentiveMantissa) returns (uint256)";
pub const SET_PRICE_ORACLE: &str = "function _setPriceOracle(address newOracle) returns (uint256)";
pub const ORACLE: &str = "function oracle() view returns (address)";
pub const MAX_ASSETS: &str = "function maxAssets() view returns (uint256)";
pub const CLOSE_FACTOR: &str = "function closeFactorMantissa() view returns (uint256)";
pub const LIQUIDATION_INCENTIVE: &str =
    "function liquidationIncentiveMantissa() view returns (uint256)";
/// Returns `(isListed, collateralFactorMantissa, isComped)`.
pub const MARKETS: &str = "function markets(address cToken) view returns (bool, uint256, bool)";
pub const SUPPORT_MARKET: &str = "function _supportMarket(address cToken) returns (uint256)";
pub const SET_COLLATERAL_FACTOR: &str = "function _setCollateralFactor(address cToken, uint256 newCollateralFactorMantissa) returns (uint256)";

/// Oracles ///

pub const MOCK_UPDATE_PRICE: &str = "function mockUpdatePrice(address cToken, uint256 price)";
pub const GET_UNDERLYING_PRICE: &str =
    "function getUnderlyingPrice(address cToken) view returns (uint256)";

/// Tokens and rate models ///

pub const DECIMALS: &str = "function decimals() view returns (uint8)";
pub const BLOCKS_PER_YEAR: &str = "function blocksPerYear() view returns (uint256)";

/// Extracts `_setPriceOracle` from `function _setPriceOracle(address) ...`.
pub fn function_name(signature: &str) -> &str {
    let signature = signature.trim();
    let signature = signature.strip_prefix("function ").unwrap_or(signature);
    signature.split('(').next().unwrap_or(signature).trim()
}

/// Compound's administrative functions report failure through a returned
/// error code instead of reverting.
pub fn returns_error_code(signature: &str) -> bool {
    function_name(signature).starts_with('_') && signature.trim_end().ends_with("returns (uint256)")
}
