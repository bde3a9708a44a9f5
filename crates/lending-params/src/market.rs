use ethers::types::{Address, U256};
use fixed_point::FixedPoint;
use fixed_point_macros::fixed;
use serde::{Deserialize, Serialize};

use crate::{units::WAD_DECIMALS, Decimal, ParamError, RateModelParams};

/// Oracle prices are scaled so that `price * underlying amount` has 36
/// decimals.
pub const PRICE_DECIMALS: u32 = 36;

/// Names the deployment ledger uses at its top level. Markets are recorded
/// under their symbol next to these, so a market may not take one of them.
pub const RESERVED_SYMBOLS: &[&str] = &[
    "Unitroller",
    "Comptroller",
    "PendingComptroller",
    "PRICE_ORACLE",
    "MockPriceOracle",
    "CompoundLens",
    "IRModels",
    "Listed",
    "Prices",
    "CollateralFactors",
    "Configuration",
];

/// A market token wrapping one underlying asset.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct MarketParams {
    pub symbol: String,
    pub name: String,
    pub underlying: Address,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    /// Underlying per market token, before accounting for decimals.
    #[serde(default = "default_exchange_rate")]
    pub initial_exchange_rate: Decimal,
    #[serde(default)]
    pub rate_model: RateModelParams,
    pub collateral_factor: Decimal,
    /// Price pushed to a mock oracle, in units of the reference asset.
    #[serde(default)]
    pub price: Option<Decimal>,
}

fn default_decimals() -> u8 {
    18
}

fn default_exchange_rate() -> Decimal {
    Decimal::from(2)
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            symbol: "tMetis".into(),
            name: "tMetis".into(),
            // The Metis token on Andromeda.
            underlying: Address::from([
                0xde, 0xad, 0xde, 0xad, 0xde, 0xad, 0xde, 0xad, 0xde, 0xad, 0xde, 0xad, 0xde,
                0xad, 0xde, 0xad, 0xde, 0xad, 0x00, 0x00,
            ]),
            decimals: default_decimals(),
            initial_exchange_rate: default_exchange_rate(),
            rate_model: RateModelParams::default(),
            collateral_factor: Decimal::from(fixed!(0.9e18)),
            price: Some(Decimal::from(19)),
        }
    }
}

impl MarketParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.symbol.trim().is_empty() {
            return Err(ParamError::EmptySymbol);
        }
        if RESERVED_SYMBOLS.contains(&self.symbol.as_str()) {
            return Err(ParamError::ReservedSymbol(self.symbol.clone()));
        }
        if self.collateral_factor.to_fixed()? > FixedPoint::one() {
            return Err(ParamError::CollateralFactorAboveOne {
                symbol: self.symbol.clone(),
                value: self.collateral_factor.clone(),
            });
        }
        self.rate_model.validate()
    }

    /// The initial exchange rate scaled by the market's decimals plus the
    /// underlying's, which are only known once the underlying is queried.
    pub fn initial_exchange_rate_mantissa(&self, underlying_decimals: u8) -> Result<U256, ParamError> {
        self.initial_exchange_rate
            .to_units(u32::from(self.decimals) + u32::from(underlying_decimals))
    }

    pub fn collateral_factor_mantissa(&self) -> Result<U256, ParamError> {
        self.collateral_factor.to_units(WAD_DECIMALS)
    }

    /// The configured price scaled for an underlying with the given decimals,
    /// or `None` when no price is configured.
    pub fn price_mantissa(&self, underlying_decimals: u8) -> Result<Option<U256>, ParamError> {
        let Some(price) = &self.price else {
            return Ok(None);
        };
        let precision = PRICE_DECIMALS
            .checked_sub(u32::from(underlying_decimals))
            .ok_or(ParamError::UnderlyingDecimalsTooLarge(underlying_decimals))?;
        price.to_units(precision).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use eyre::Result;
    use fixed_point_macros::uint256;

    use super::*;

    #[test]
    fn test_exchange_rate_scales_with_underlying() -> Result<()> {
        let market = MarketParams::default();
        assert_eq!(market.initial_exchange_rate_mantissa(18)?, uint256!(2e36));
        assert_eq!(market.initial_exchange_rate_mantissa(6)?, uint256!(2e24));
        assert_eq!(market.initial_exchange_rate_mantissa(0)?, uint256!(2e18));
        Ok(())
    }

    #[test]
    fn test_price_scales_inversely_with_underlying() -> Result<()> {
        let market = MarketParams::default();
        assert_eq!(market.price_mantissa(18)?, Some(uint256!(19e18)));
        assert_eq!(market.price_mantissa(6)?, Some(uint256!(19e30)));
        assert!(matches!(
            market.price_mantissa(40),
            Err(ParamError::UnderlyingDecimalsTooLarge(40))
        ));

        let unpriced = MarketParams {
            price: None,
            ..Default::default()
        };
        assert_eq!(unpriced.price_mantissa(18)?, None);
        Ok(())
    }

    #[test]
    fn test_collateral_factor_bounds() -> Result<()> {
        let market = MarketParams::default();
        assert_eq!(market.collateral_factor_mantissa()?, uint256!(0.9e18));

        let full = MarketParams {
            collateral_factor: Decimal::from(1),
            ..Default::default()
        };
        assert!(full.validate().is_ok());

        let over = MarketParams {
            collateral_factor: "1.01".parse()?,
            ..Default::default()
        };
        assert!(matches!(
            over.validate(),
            Err(ParamError::CollateralFactorAboveOne { .. })
        ));
        Ok(())
    }
}
