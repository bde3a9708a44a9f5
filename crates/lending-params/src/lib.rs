//! Deployment parameters for the lending protocol and the pure derivations
//! that turn them into constructor and call arguments.

mod controller;
mod market;
mod rate_model;
pub mod units;

use std::{collections::HashSet, fs, io, path::Path};

pub use controller::ControllerParams;
use ethers::types::Address;
pub use market::{MarketParams, PRICE_DECIMALS, RESERVED_SYMBOLS};
pub use rate_model::{
    default_white_paper, jump_multiplier, JumpRateArgs, JumpRateParams, RateModelParams,
    WhitePaperArgs, WhitePaperParams, DEFAULT_BLOCKS_PER_YEAR,
};
use serde::{Deserialize, Serialize};
pub use units::{format_units, Decimal};

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("invalid decimal `{value}`: {reason}")]
    InvalidDecimal { value: String, reason: String },
    #[error("`{0}` is negative")]
    Negative(String),
    #[error("`{value}` does not fit in a uint256 at {precision} decimals")]
    Overflow { value: String, precision: u32 },
    #[error("precision {0} is larger than a uint256 can hold")]
    PrecisionTooLarge(u32),
    #[error("kink must be strictly between 0 and 100, got {0}")]
    KinkOutOfRange(Decimal),
    #[error("post-kink multiplier {post_kink_multiplier} is below the multiplier {multiplier}")]
    PostKinkBelowPreKink {
        multiplier: Decimal,
        post_kink_multiplier: Decimal,
    },
    #[error("max assets must be positive")]
    MaxAssetsZero,
    #[error("close factor must be positive")]
    CloseFactorZero,
    #[error("liquidation incentive must be at least 1, got {0}")]
    LiquidationIncentiveBelowOne(Decimal),
    #[error("collateral factor of {symbol} must be at most 1, got {value}")]
    CollateralFactorAboveOne { symbol: String, value: Decimal },
    #[error("market symbol is empty")]
    EmptySymbol,
    #[error("market symbol {0} is reserved by the deployment ledger")]
    ReservedSymbol(String),
    #[error("market symbol {0} is configured twice")]
    DuplicateSymbol(String),
    #[error("no market with symbol {0}")]
    UnknownMarket(String),
    #[error("underlying has {0} decimals, more than prices can represent")]
    UnderlyingDecimalsTooLarge(u8),
    #[error("failed to read parameters: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse parameters: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything a deployment run needs to know up front.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParameterSet {
    /// Owner of deployed markets and rate models. Defaults to the deployer.
    pub admin: Option<Address>,
    pub controller: ControllerParams,
    /// Rate models deployed on their own, in addition to the ones the
    /// markets reference.
    pub rate_models: Vec<RateModelParams>,
    pub markets: Vec<MarketParams>,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            admin: None,
            controller: ControllerParams::default(),
            rate_models: vec![default_white_paper(), RateModelParams::default()],
            markets: vec![MarketParams::default()],
        }
    }
}

impl ParameterSet {
    /// Reads a JSON parameter file. Omitted sections take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParamError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Checks every rule that can be checked without touching the chain.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.controller.validate()?;
        for model in &self.rate_models {
            model.validate()?;
        }
        let mut symbols = HashSet::new();
        for market in &self.markets {
            market.validate()?;
            if !symbols.insert(market.symbol.as_str()) {
                return Err(ParamError::DuplicateSymbol(market.symbol.clone()));
            }
        }
        Ok(())
    }

    pub fn market(&self, symbol: &str) -> Result<&MarketParams, ParamError> {
        self.markets
            .iter()
            .find(|m| m.symbol == symbol)
            .ok_or_else(|| ParamError::UnknownMarket(symbol.to_string()))
    }

    /// Every distinct rate model, standalone ones first, then the ones
    /// referenced by markets.
    pub fn all_rate_models(&self) -> Vec<&RateModelParams> {
        let mut models: Vec<&RateModelParams> = vec![];
        for model in self
            .rate_models
            .iter()
            .chain(self.markets.iter().map(|m| &m.rate_model))
        {
            if !models.contains(&model) {
                models.push(model);
            }
        }
        models
    }
}
