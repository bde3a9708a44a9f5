//! Where each component lives in the deployment ledger.

use deployment_ledger::LedgerKey;
use lending_params::RateModelParams;

pub const UNITROLLER: &str = "Unitroller";
/// Written only once the proxy has adopted the logic contract.
pub const COMPTROLLER: &str = "Comptroller";
/// A logic contract that is deployed but not yet adopted by the proxy.
pub const PENDING_COMPTROLLER: &str = "PendingComptroller";
/// The oracle the controller reads prices from.
pub const PRICE_ORACLE: &str = "PRICE_ORACLE";
pub const MOCK_PRICE_ORACLE: &str = "MockPriceOracle";
pub const COMPOUND_LENS: &str = "CompoundLens";

pub fn unitroller() -> LedgerKey {
    UNITROLLER.into()
}

pub fn comptroller() -> LedgerKey {
    COMPTROLLER.into()
}

pub fn pending_comptroller() -> LedgerKey {
    PENDING_COMPTROLLER.into()
}

pub fn price_oracle() -> LedgerKey {
    PRICE_ORACLE.into()
}

pub fn mock_price_oracle() -> LedgerKey {
    MOCK_PRICE_ORACLE.into()
}

pub fn compound_lens() -> LedgerKey {
    COMPOUND_LENS.into()
}

/// Records that the controller's risk parameters were applied, keyed to
/// the proxy they were applied to.
pub fn controller_config() -> LedgerKey {
    ["Configuration", "Controller"].into()
}

/// A market token, keyed by its symbol.
pub fn market(symbol: &str) -> LedgerKey {
    symbol.into()
}

pub fn listed(symbol: &str) -> LedgerKey {
    ["Listed", symbol].into()
}

pub fn price(symbol: &str) -> LedgerKey {
    ["Prices", symbol].into()
}

pub fn collateral_factor(symbol: &str) -> LedgerKey {
    ["CollateralFactors", symbol].into()
}

/// Rate models are grouped by contract and coefficients so several
/// configurations can coexist.
pub fn rate_model(model: &RateModelParams) -> LedgerKey {
    match model {
        RateModelParams::WhitePaper(_) => LedgerKey::new(["IRModels".to_string(), model.fragment()]),
        RateModelParams::JumpRate(params) => jump_rate_model(params.blocks_per_year, &model.fragment()),
    }
}

pub fn jump_rate_model(blocks_per_year: u64, fragment: &str) -> LedgerKey {
    LedgerKey::new([
        "IRModels".to_string(),
        "JumpRateModelV2".to_string(),
        blocks_per_year.to_string(),
        fragment.to_string(),
    ])
}
