mod gateway;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    core::utils::Anvil,
    middleware::{
        gas_escalator::{Frequency, GeometricGasPrice},
        nonce_manager::NonceManagerError,
        GasEscalatorMiddleware, MiddlewareError, NonceManagerMiddleware, SignerMiddleware,
    },
    providers::{
        Http, HttpClientError, HttpRateLimitRetryPolicy, Middleware, PendingTransaction, Provider,
        RetryClient, RetryClientBuilder, RetryPolicy,
    },
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, BlockId},
    utils::AnvilInstance,
};
use eyre::{eyre, Result};
use tracing::info;

use crate::constants::POLL_INTERVAL;
pub use gateway::EthersGateway;

const INTRINSIC_GAS_TOO_HIGH: &str = "intrinsic gas too high";

/// Retries rate limits and timeouts, plus "intrinsic gas too high" which
/// public RPCs report while a replacement transaction is in flight.
#[derive(Debug, Default)]
struct DeployRetryPolicy(HttpRateLimitRetryPolicy);

impl RetryPolicy<HttpClientError> for DeployRetryPolicy {
    fn should_retry(&self, error: &HttpClientError) -> bool {
        self.0.should_retry(error) || error.to_string().contains(INTRINSIC_GAS_TOO_HIGH)
    }

    fn backoff_hint(&self, error: &HttpClientError) -> Option<Duration> {
        self.0.backoff_hint(error).or_else(|| {
            error
                .to_string()
                .contains(INTRINSIC_GAS_TOO_HIGH)
                .then_some(*POLL_INTERVAL)
        })
    }
}

type ChainClientProvider = Arc<RetryClient<Http>>;

type ChainClientInner<S> =
    NonceManagerMiddleware<SignerMiddleware<GasEscalatorMiddleware<Provider<ChainClientProvider>>, S>>;

/// The deployer's signing client: retries, a per-block gas escalator,
/// signing, and local nonce management, outermost last.
#[derive(Debug)]
pub struct ChainClient<S: Signer + 'static> {
    inner: ChainClientInner<S>,
    address: Address,
}

impl<S: Signer + 'static> ChainClient<S> {
    pub async fn new(provider: Provider<Http>, signer: S) -> Result<Self> {
        let provider = RetryClientBuilder::default()
            .rate_limit_retries(10)
            .timeout_retries(3)
            .initial_backoff(Duration::from_millis(500))
            .build(
                provider.as_ref().clone(),
                Box::<DeployRetryPolicy>::default(),
            );
        let provider = Provider::new(Arc::new(provider)).interval(*POLL_INTERVAL);

        // Stuck deployments get repriced by 12.5% every block, without a cap.
        let inner = GasEscalatorMiddleware::new(
            provider,
            GeometricGasPrice::new(1.125, 10u64, None::<u64>),
            Frequency::PerBlock,
        );
        let inner = SignerMiddleware::new_with_provider_chain(inner, signer).await?;
        let address = inner.address();
        let inner = NonceManagerMiddleware::new(inner, address);

        Ok(Self { inner, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl<S: Signer + 'static> Middleware for ChainClient<S> {
    type Error = NonceManagerError<Self::Inner>;
    type Provider = ChainClientProvider;
    type Inner = ChainClientInner<S>;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    // Sends go through the top of the stack so the nonce manager sees them.
    async fn send_transaction<T: Into<TypedTransaction> + Send + Sync>(
        &self,
        tx: T,
        block: Option<BlockId>,
    ) -> Result<PendingTransaction<'_, Self::Provider>, Self::Error> {
        self.inner
            .send_transaction(tx, block)
            .await
            .map_err(MiddlewareError::from_err)
    }
}

/// A connection to the target network. With no RPC URL, a local anvil node
/// is spawned and torn down with the `Chain`.
pub struct Chain {
    provider: Provider<Http>,
    chain_id: u64,
    anvil: Option<AnvilInstance>,
}

impl Chain {
    pub async fn connect(maybe_rpc_url: Option<String>) -> Result<Self> {
        let (provider, anvil) = match maybe_rpc_url {
            Some(rpc_url) => (Provider::<Http>::try_from(rpc_url)?, None),
            None => {
                let anvil = Anvil::new().spawn();
                (Provider::<Http>::try_from(anvil.endpoint())?, Some(anvil))
            }
        };
        let provider = provider.interval(*POLL_INTERVAL);
        let chain_id = provider.get_chainid().await?.as_u64();
        let client_version = provider.client_version().await?;
        info!(chain_id, %client_version, local = anvil.is_some(), "connected");
        Ok(Self {
            provider,
            chain_id,
            anvil,
        })
    }

    pub fn provider(&self) -> Provider<Http> {
        self.provider.clone()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Whether this is an anvil node spawned by `connect`, whose state dies
    /// with the process.
    pub fn is_local(&self) -> bool {
        self.anvil.is_some()
    }

    /// A client that signs with `signer`, bound to this chain's id.
    pub async fn client(&self, signer: LocalWallet) -> Result<Arc<ChainClient<LocalWallet>>> {
        let signer = signer.with_chain_id(self.chain_id);
        Ok(Arc::new(ChainClient::new(self.provider(), signer).await?))
    }

    /// The first funded account of a spawned anvil node.
    pub fn dev_signer(&self) -> Result<LocalWallet> {
        let anvil = self
            .anvil
            .as_ref()
            .ok_or_else(|| eyre!("only spawned local chains have dev accounts"))?;
        let key = anvil
            .keys()
            .first()
            .ok_or_else(|| eyre!("anvil has no accounts"))?;
        Ok(LocalWallet::from(key.clone()))
    }
}
