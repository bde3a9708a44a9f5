use ethers::types::{Address, U256};
use fixed_point::FixedPoint;
use fixed_point_macros::fixed;
use serde::{Deserialize, Serialize};

use crate::{units::WAD_DECIMALS, Decimal, ParamError};

/// Risk parameters of the controller.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerParams {
    /// The maximum number of markets an account may enter.
    pub max_assets: u64,
    /// Fraction of a borrow that can be repaid in one liquidation.
    pub close_factor: Decimal,
    /// Collateral multiplier paid to liquidators. At least `1`.
    pub liquidation_incentive: Decimal,
    /// An existing price oracle. A mock oracle is deployed when unset.
    pub oracle: Option<Address>,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            max_assets: 20,
            close_factor: Decimal::from(fixed!(0.5e18)),
            liquidation_incentive: Decimal::from(fixed!(1.05e18)),
            oracle: None,
        }
    }
}

impl ControllerParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.max_assets == 0 {
            return Err(ParamError::MaxAssetsZero);
        }
        if self.close_factor.is_zero() {
            return Err(ParamError::CloseFactorZero);
        }
        self.close_factor_mantissa()?;
        if self.liquidation_incentive.to_fixed()? < FixedPoint::one() {
            return Err(ParamError::LiquidationIncentiveBelowOne(
                self.liquidation_incentive.clone(),
            ));
        }
        Ok(())
    }

    pub fn close_factor_mantissa(&self) -> Result<U256, ParamError> {
        self.close_factor.to_units(WAD_DECIMALS)
    }

    pub fn liquidation_incentive_mantissa(&self) -> Result<U256, ParamError> {
        self.liquidation_incentive.to_units(WAD_DECIMALS)
    }
}
