//! The pipelines exposed by the CLI. Each validates its parameters before
//! returning so a bad parameter file never reaches the chain.

use lending_params::{MarketParams, ParameterSet};

use crate::{
    errors::DeployError,
    orchestrator::{Pipeline, Step},
    steps::{
        AdoptComptroller, ConfigureController, DeployLens, DeployMarket, DeployMockOracle,
        DeployRateModel, DeployUnitroller, ListMarket, SetCollateralFactor, SetMockPrice,
        SetPriceOracle, UpgradeComptroller,
    },
};

/// Deploys and wires the whole protocol.
pub fn protocol(params: &ParameterSet) -> Result<Pipeline, DeployError> {
    params.validate()?;
    let mock_oracle = params.controller.oracle.is_none();

    let mut pipeline = Pipeline::new("protocol");
    if mock_oracle {
        pipeline = pipeline.then(DeployMockOracle);
    }
    pipeline = pipeline
        .then(DeployUnitroller)
        .then(AdoptComptroller)
        .then(ConfigureController::new(params.controller.clone()))
        .then(SetPriceOracle::new(params.controller.oracle))
        .then(DeployLens);
    pipeline = with_rate_models(pipeline, params);

    let markets = params
        .markets
        .iter()
        .map(|market| Box::new(DeployMarket::new(market.clone(), params.admin)) as Box<dyn Step>)
        .collect();
    pipeline = pipeline.fan_out(markets);
    Ok(with_market_configuration(pipeline, params, &params.markets))
}

/// Deploys one market, and its rate model if needed, against an existing
/// controller.
pub fn single_market(params: &ParameterSet, symbol: &str) -> Result<Pipeline, DeployError> {
    params.validate()?;
    let market = params.market(symbol)?;
    let pipeline = Pipeline::new(format!("market:{symbol}"))
        .then(DeployRateModel::new(market.rate_model.clone(), params.admin))
        .then(DeployMarket::new(market.clone(), params.admin));
    Ok(with_market_configuration(
        pipeline,
        params,
        std::slice::from_ref(market),
    ))
}

pub fn rate_models(params: &ParameterSet) -> Result<Pipeline, DeployError> {
    params.validate()?;
    Ok(with_rate_models(Pipeline::new("rate-models"), params))
}

/// Applies the controller and market configuration to contracts that are
/// already deployed.
pub fn configure(params: &ParameterSet) -> Result<Pipeline, DeployError> {
    params.validate()?;
    let mut pipeline = Pipeline::new("configure");
    if params.controller.oracle.is_none() {
        pipeline = pipeline.then(DeployMockOracle);
    }
    pipeline = pipeline
        .then(ConfigureController::new(params.controller.clone()))
        .then(SetPriceOracle::new(params.controller.oracle));
    Ok(with_market_configuration(pipeline, params, &params.markets))
}

pub fn upgrade_comptroller() -> Pipeline {
    Pipeline::new("upgrade-comptroller").then(UpgradeComptroller)
}

fn with_rate_models(mut pipeline: Pipeline, params: &ParameterSet) -> Pipeline {
    for model in params.all_rate_models() {
        pipeline = pipeline.then(DeployRateModel::new(model.clone(), params.admin));
    }
    pipeline
}

/// Listing, then prices, then collateral factors. Prices are only pushed
/// when the controller uses a mock oracle.
fn with_market_configuration(
    mut pipeline: Pipeline,
    params: &ParameterSet,
    markets: &[MarketParams],
) -> Pipeline {
    let mock_oracle = params.controller.oracle.is_none();
    for market in markets {
        pipeline = pipeline.then(ListMarket::new(&market.symbol));
    }
    for market in markets {
        if mock_oracle && market.price.is_some() {
            pipeline = pipeline.then(SetMockPrice::new(market.clone()));
        }
    }
    for market in markets {
        let requires_price = mock_oracle && market.price.is_some();
        pipeline = pipeline.then(SetCollateralFactor::new(market.clone(), requires_price));
    }
    pipeline
}
