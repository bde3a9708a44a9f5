use async_trait::async_trait;
use deployment_ledger::LedgerKey;
use ethers::{
    abi::Token,
    types::{Address, U256},
};
use lending_params::MarketParams;
use tracing::info;

use super::{apply_setting, token_decimals};
use crate::{
    errors::DeployError,
    executor::StepExecutor,
    keys,
    orchestrator::Step,
    solidity::{
        CERC20_IMMUTABLE, GET_UNDERLYING_PRICE, MARKETS, MOCK_UPDATE_PRICE, ORACLE,
        SET_COLLATERAL_FACTOR, SUPPORT_MARKET,
    },
};

/// Deploys a market token against the controller proxy.
pub struct DeployMarket {
    market: MarketParams,
    admin: Option<Address>,
}

impl DeployMarket {
    pub fn new(market: MarketParams, admin: Option<Address>) -> Self {
        Self { market, admin }
    }
}

#[async_trait]
impl Step for DeployMarket {
    fn id(&self) -> String {
        format!("deploy-market:{}", self.market.symbol)
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![
            keys::unitroller(),
            keys::comptroller(),
            keys::rate_model(&self.market.rate_model),
        ]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::market(&self.market.symbol)]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let rate_model = executor.address(&keys::rate_model(&self.market.rate_model))?;
        let underlying_decimals = token_decimals(executor, self.market.underlying).await?;
        let exchange_rate = self.market.initial_exchange_rate_mantissa(underlying_decimals)?;
        let admin = self.admin.unwrap_or_else(|| executor.sender());

        executor
            .deploy(
                keys::market(&self.market.symbol),
                &CERC20_IMMUTABLE,
                vec![
                    Token::Address(self.market.underlying),
                    Token::Address(unitroller),
                    Token::Address(rate_model),
                    Token::Uint(exchange_rate),
                    Token::String(self.market.name.clone()),
                    Token::String(self.market.symbol.clone()),
                    Token::Uint(self.market.decimals.into()),
                    Token::Address(admin),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Adds a deployed market to the controller.
pub struct ListMarket {
    symbol: String,
}

impl ListMarket {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

#[async_trait]
impl Step for ListMarket {
    fn id(&self) -> String {
        format!("list-market:{}", self.symbol)
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![
            keys::unitroller(),
            keys::comptroller(),
            keys::market(&self.symbol),
        ]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![keys::listed(&self.symbol)]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let market = executor.address(&keys::market(&self.symbol))?;
        executor
            .call(unitroller, SUPPORT_MARKET, vec![Token::Address(market)])
            .await?;
        executor.record(&keys::listed(&self.symbol), market)
    }
}

/// Pushes the configured price of a market to the mock oracle when the
/// oracle holds a different one. `Prices/<symbol>` records the oracle that
/// was priced.
pub struct SetMockPrice {
    market: MarketParams,
}

impl SetMockPrice {
    pub fn new(market: MarketParams) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Step for SetMockPrice {
    fn id(&self) -> String {
        format!("set-price:{}", self.market.symbol)
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        vec![
            keys::unitroller(),
            keys::comptroller(),
            keys::mock_price_oracle(),
            keys::price_oracle(),
            keys::market(&self.market.symbol),
        ]
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let market = executor.address(&keys::market(&self.market.symbol))?;
        let mock = executor.address(&keys::mock_price_oracle())?;

        // Prices only matter on the oracle the controller actually reads.
        let oracle = executor.read_address(unitroller, ORACLE, vec![]).await?;
        if oracle != mock {
            return Err(DeployError::UnexpectedState(format!(
                "controller reads prices from {oracle:#x}, not the mock oracle at {mock:#x}"
            )));
        }

        let underlying_decimals = token_decimals(executor, self.market.underlying).await?;
        let price = self
            .market
            .price_mantissa(underlying_decimals)?
            .ok_or_else(|| {
                DeployError::Config(format!("no price configured for {}", self.market.symbol))
            })?;
        let current = executor
            .read_uint(oracle, GET_UNDERLYING_PRICE, vec![Token::Address(market)])
            .await?;
        apply_setting(
            executor,
            oracle,
            MOCK_UPDATE_PRICE,
            vec![Token::Address(market), Token::Uint(price)],
            current,
            price,
        )
        .await?;
        executor.record(&keys::price(&self.market.symbol), oracle)
    }
}

/// Sets how much of a market's value counts as borrowing power.
///
/// Without a price the factor is meaningless, so the step waits for the
/// controller's oracle (and, for mock oracles, the market's price) to be
/// recorded. The recorded price is the gate; a live oracle read is only
/// made when `check_live_price` is enabled.
///
/// The factor is compared with the controller's `markets()` entry on every
/// pass and only sent when it differs.
pub struct SetCollateralFactor {
    market: MarketParams,
    requires_price: bool,
}

impl SetCollateralFactor {
    pub fn new(market: MarketParams, requires_price: bool) -> Self {
        Self {
            market,
            requires_price,
        }
    }
}

#[async_trait]
impl Step for SetCollateralFactor {
    fn id(&self) -> String {
        format!("set-collateral-factor:{}", self.market.symbol)
    }

    fn depends_on(&self) -> Vec<LedgerKey> {
        let symbol = &self.market.symbol;
        let mut deps = vec![
            keys::unitroller(),
            keys::comptroller(),
            keys::price_oracle(),
            keys::market(symbol),
            keys::listed(symbol),
        ];
        if self.requires_price {
            deps.push(keys::price(symbol));
        }
        deps
    }

    fn produces(&self) -> Vec<LedgerKey> {
        vec![]
    }

    async fn run(&self, executor: &StepExecutor) -> Result<(), DeployError> {
        let unitroller = executor.address(&keys::unitroller())?;
        let market = executor.address(&keys::market(&self.market.symbol))?;

        if executor.options().check_live_price {
            let oracle = executor.address(&keys::price_oracle())?;
            let price = executor
                .read_uint(oracle, GET_UNDERLYING_PRICE, vec![Token::Address(market)])
                .await?;
            if price == U256::zero() {
                return Err(DeployError::UnexpectedState(format!(
                    "oracle {oracle:#x} has no price for {}",
                    self.market.symbol
                )));
            }
            info!(symbol = %self.market.symbol, %price, "live price confirmed");
        }

        let desired = self.market.collateral_factor_mantissa()?;
        let current = match executor
            .read(unitroller, MARKETS, vec![Token::Address(market)])
            .await?
            .as_slice()
        {
            [_, Token::Uint(factor), ..] => *factor,
            other => {
                return Err(DeployError::UnexpectedState(format!(
                    "markets({market:#x}) returned {other:?}"
                )))
            }
        };
        apply_setting(
            executor,
            unitroller,
            SET_COLLATERAL_FACTOR,
            vec![Token::Address(market), Token::Uint(desired)],
            current,
            desired,
        )
        .await?;
        executor.record(&keys::collateral_factor(&self.market.symbol), market)
    }
}
