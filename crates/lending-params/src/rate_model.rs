use ethers::types::{Address, U256};
use fixed_point::FixedPoint;
use fixed_point_macros::fixed;
use serde::{Deserialize, Serialize};

use crate::{units::WAD_DECIMALS, Decimal, ParamError};

/// Compound's estimate for 15 second blocks.
pub const DEFAULT_BLOCKS_PER_YEAR: u64 = 2_102_400;

/// Percentages are encoded on-chain as `percent / 100` with 18 decimals,
/// which is the same as scaling the percentage itself to 16 decimals.
const PERCENT_DECIMALS: u32 = WAD_DECIMALS - 2;

/// Interest rate model coefficients. All rates are yearly percentages.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateModelParams {
    /// A single linear segment.
    WhitePaper(WhitePaperParams),
    /// Two linear segments joined at the kink.
    JumpRate(JumpRateParams),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WhitePaperParams {
    pub base_rate: Decimal,
    pub multiplier: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct JumpRateParams {
    pub base_rate: Decimal,
    /// Utilization, in percent, where the curve steepens.
    pub kink: Decimal,
    /// Slope before the kink.
    pub multiplier: Decimal,
    /// Rate reached at 100% utilization once the post-kink slope applies.
    pub post_kink_multiplier: Decimal,
    /// Owner of the model. Falls back to the deployment admin.
    #[serde(default)]
    pub admin: Option<Address>,
    /// The value the model contract reports from `blocksPerYear()`.
    #[serde(default = "default_blocks_per_year")]
    pub blocks_per_year: u64,
}

fn default_blocks_per_year() -> u64 {
    DEFAULT_BLOCKS_PER_YEAR
}

/// Constructor arguments of `WhitePaperInterestRateModel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WhitePaperArgs {
    pub base_rate_per_year: U256,
    pub multiplier_per_year: U256,
}

/// Constructor arguments of `JumpRateModelV2`, minus the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpRateArgs {
    pub base_rate_per_year: U256,
    pub multiplier_per_year: U256,
    pub jump_multiplier_per_year: U256,
    pub kink: U256,
}

impl RateModelParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            Self::WhitePaper(params) => params.derive().map(|_| ()),
            Self::JumpRate(params) => params.derive().map(|_| ()),
        }
    }

    /// The coefficient tuple that distinguishes this model from other
    /// deployments of the same contract, e.g. `0__80__50__1000`.
    pub fn fragment(&self) -> String {
        let parts = match self {
            Self::WhitePaper(p) => vec![&p.base_rate, &p.multiplier],
            Self::JumpRate(p) => vec![&p.base_rate, &p.kink, &p.multiplier, &p.post_kink_multiplier],
        };
        parts
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("__")
    }
}

impl WhitePaperParams {
    pub fn derive(&self) -> Result<WhitePaperArgs, ParamError> {
        Ok(WhitePaperArgs {
            base_rate_per_year: self.base_rate.to_units(PERCENT_DECIMALS)?,
            multiplier_per_year: self.multiplier.to_units(PERCENT_DECIMALS)?,
        })
    }
}

impl JumpRateParams {
    /// The post-kink slope, in percent, that makes the curve reach
    /// `post_kink_multiplier` at full utilization.
    pub fn jump_multiplier(&self) -> Result<Decimal, ParamError> {
        jump_multiplier(&self.kink, &self.multiplier, &self.post_kink_multiplier)
    }

    pub fn derive(&self) -> Result<JumpRateArgs, ParamError> {
        let jump = self.jump_multiplier()?;
        Ok(JumpRateArgs {
            base_rate_per_year: self.base_rate.to_units(PERCENT_DECIMALS)?,
            multiplier_per_year: self.multiplier.to_units(PERCENT_DECIMALS)?,
            jump_multiplier_per_year: jump.to_units(PERCENT_DECIMALS)?,
            kink: self.kink.to_units(PERCENT_DECIMALS)?,
        })
    }
}

/// Computes `(M2 - M1) / (100 - K) * 100` in 18-decimal fixed point.
///
/// The kink must lie strictly inside `(0, 100)` and the post-kink multiplier
/// may not be below the pre-kink one. Inputs are `Decimal`s so they are
/// non-negative by construction.
pub fn jump_multiplier(
    kink: &Decimal,
    multiplier: &Decimal,
    post_kink_multiplier: &Decimal,
) -> Result<Decimal, ParamError> {
    let k = kink.to_fixed()?;
    if k == fixed!(0) || k >= fixed!(100e18) {
        return Err(ParamError::KinkOutOfRange(kink.clone()));
    }
    let m1 = multiplier.to_fixed()?;
    let m2 = post_kink_multiplier.to_fixed()?;
    let rise = m2
        .checked_sub(m1)
        .ok_or_else(|| ParamError::PostKinkBelowPreKink {
            multiplier: multiplier.clone(),
            post_kink_multiplier: post_kink_multiplier.clone(),
        })?;
    let jump = rise
        .checked_mul_div_down(fixed!(100e18), fixed!(100e18) - k)
        .ok_or_else(|| ParamError::Overflow {
            value: post_kink_multiplier.to_string(),
            precision: WAD_DECIMALS,
        })?;
    Ok(Decimal::from(jump))
}

impl Default for RateModelParams {
    fn default() -> Self {
        Self::JumpRate(JumpRateParams {
            base_rate: Decimal::zero(),
            kink: Decimal::from(80),
            multiplier: Decimal::from(50),
            post_kink_multiplier: Decimal::from(1_000),
            admin: None,
            blocks_per_year: DEFAULT_BLOCKS_PER_YEAR,
        })
    }
}

/// The flat model used by the first deployments.
pub fn default_white_paper() -> RateModelParams {
    RateModelParams::WhitePaper(WhitePaperParams {
        base_rate: Decimal::from(2),
        multiplier: Decimal::from(20),
    })
}
