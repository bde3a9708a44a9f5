use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// The networks the protocol is deployed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Metis,
    Kovan,
    Localhost,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Metis => "metis",
            Network::Kovan => "kovan",
            Network::Localhost => "localhost",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Metis => 1088,
            Network::Kovan => 42,
            Network::Localhost => 31337,
        }
    }

    /// Production networks wait for more blocks since they can reorg.
    pub fn default_confirmations(&self) -> usize {
        match self {
            Network::Metis => 3,
            Network::Kovan | Network::Localhost => 1,
        }
    }

    pub fn default_rpc_url(&self) -> Option<&'static str> {
        match self {
            Network::Metis => Some("https://andromeda.metis.io/?owner=1088"),
            Network::Kovan | Network::Localhost => None,
        }
    }

    /// The Etherscan-compatible API used for source verification.
    pub fn explorer_api_url(&self) -> Option<&'static str> {
        match self {
            Network::Metis => Some("https://andromeda-explorer.metis.io/api"),
            Network::Kovan => Some("https://api-kovan.etherscan.io/api"),
            Network::Localhost => None,
        }
    }

    /// `<dir>/<network>.json`.
    pub fn ledger_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.name()))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Secrets and endpoint overrides read from the environment (or `.env`).
#[derive(Clone, Default, Deserialize)]
pub struct DeployEnv {
    pub private_key: Option<String>,
    /// Admin of deployed markets and rate models when the parameter file
    /// doesn't name one.
    pub public_key: Option<Address>,
    pub etherscan_api_key: Option<String>,
    pub metis_rpc: Option<String>,
    pub kovan_rpc: Option<String>,
    pub localhost_rpc: Option<String>,
}

impl fmt::Debug for DeployEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployEnv")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key)
            .field("etherscan_api_key", &self.etherscan_api_key.as_ref().map(|_| "<redacted>"))
            .field("metis_rpc", &self.metis_rpc)
            .field("kovan_rpc", &self.kovan_rpc)
            .field("localhost_rpc", &self.localhost_rpc)
            .finish()
    }
}

impl DeployEnv {
    pub fn from_env() -> Result<Self, DeployError> {
        envy::from_env().map_err(|e| DeployError::Config(e.to_string()))
    }

    /// The RPC endpoint for `network`. `None` on localhost means a local
    /// anvil node should be spawned; any other network without an endpoint
    /// is a configuration error.
    pub fn rpc_url(&self, network: Network) -> Result<Option<String>, DeployError> {
        let (url, var) = match network {
            Network::Metis => (self.metis_rpc.clone(), "METIS_RPC"),
            Network::Kovan => (self.kovan_rpc.clone(), "KOVAN_RPC"),
            Network::Localhost => return Ok(self.localhost_rpc.clone()),
        };
        url.or_else(|| network.default_rpc_url().map(String::from))
            .map(Some)
            .ok_or_else(|| DeployError::Config(format!("{var} must be set to deploy to {network}")))
    }
}

/// Knobs that control how steps wait on the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Blocks (including the inclusion block) before a transaction is
    /// treated as final.
    pub confirmations: usize,
    /// Upper bound on any single confirmation wait.
    pub confirmation_timeout: Duration,
    /// Require a live, nonzero oracle price before setting a collateral
    /// factor, in addition to the ledger record of the price.
    pub check_live_price: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            confirmations: 1,
            confirmation_timeout: Duration::from_secs(600),
            check_live_price: false,
        }
    }
}

impl ExecutionOptions {
    pub fn for_network(network: Network) -> Self {
        Self {
            confirmations: network.default_confirmations(),
            ..Default::default()
        }
    }
}
