//! Deploys the lending protocol to a network, resuming from that network's
//! deployment ledger.
//!
//! ```text
//! lending-deploy --network metis protocol
//! lending-deploy --network kovan market --symbol tUSDC
//! ```
use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use deployment_ledger::Ledger;
use dotenvy::dotenv;
use ethers::signers::{LocalWallet, Signer};
use eyre::{eyre, Result};
use lending_deployer::{
    artifacts::ArtifactStore,
    chain::{Chain, EthersGateway},
    config::{DeployEnv, ExecutionOptions, Network},
    pipelines,
    verifier::EtherscanVerifier,
    Orchestrator, Pipeline,
};
use lending_params::ParameterSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lending-deploy", about = "Deploy and configure the lending protocol")]
struct Args {
    #[arg(long, env = "DEPLOY_NETWORK", value_enum, default_value = "localhost")]
    network: Network,
    /// JSON parameter file. The historical deployment is used when omitted.
    #[arg(long)]
    params: Option<PathBuf>,
    #[arg(long, default_value = "deployments")]
    ledger_dir: PathBuf,
    /// Hardhat's artifacts directory.
    #[arg(long, default_value = "artifacts")]
    artifacts: PathBuf,
    /// Overrides the network's confirmation count.
    #[arg(long)]
    confirmations: Option<usize>,
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
    /// Moves the existing ledger aside and deploys everything again. Runs
    /// against a spawned local node always start from an empty ledger.
    #[arg(long)]
    fresh: bool,
    /// Require a live oracle price before setting collateral factors.
    #[arg(long)]
    check_live_price: bool,
    #[arg(long)]
    skip_verify: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy and wire the whole protocol.
    Protocol,
    /// Deploy a single market against an existing controller.
    Market {
        #[arg(long)]
        symbol: String,
    },
    /// Deploy the configured interest rate models.
    RateModels,
    /// Apply controller and market configuration.
    Configure,
    /// Deploy a new controller implementation behind the existing proxy.
    UpgradeComptroller,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let env = DeployEnv::from_env()?;

    let mut params = match &args.params {
        Some(path) => ParameterSet::load(path)?,
        None => ParameterSet::default(),
    };
    if params.admin.is_none() {
        params.admin = env.public_key;
    }
    // Pipelines validate their parameters, so nothing below runs on bad input.
    let pipeline = build_pipeline(&args.command, &params)?;

    let chain = Chain::connect(env.rpc_url(args.network)?).await?;
    if chain.chain_id() != args.network.chain_id() {
        return Err(eyre!(
            "connected to chain {} but {} is chain {}",
            chain.chain_id(),
            args.network,
            args.network.chain_id()
        ));
    }
    let signer = match &env.private_key {
        Some(key) => key.parse::<LocalWallet>()?,
        None => chain.dev_signer()?,
    };
    let sender = signer.address();
    let client = chain.client(signer).await?;
    let artifacts = ArtifactStore::new(&args.artifacts);
    let gateway = Arc::new(EthersGateway::new(client, sender, artifacts.clone()));

    let ledger_path = args.network.ledger_path(&args.ledger_dir);
    let ledger = if chain.is_local() {
        // Addresses on a spawned node are gone once it exits.
        info!("deploying to a spawned node, the ledger is kept in memory");
        Arc::new(Ledger::in_memory())
    } else {
        if args.fresh {
            if let Some(backup) = Ledger::archive(&ledger_path)? {
                warn!(backup = %backup.display(), "moved the existing ledger aside");
            }
        }
        Arc::new(Ledger::load(&ledger_path)?)
    };

    let mut options = ExecutionOptions::for_network(args.network);
    if let Some(confirmations) = args.confirmations {
        options.confirmations = confirmations;
    }
    options.confirmation_timeout = Duration::from_secs(args.timeout_secs);
    options.check_live_price = args.check_live_price;

    let mut orchestrator = Orchestrator::new(gateway, ledger.clone(), options);
    match (args.skip_verify, args.network.explorer_api_url(), &env.etherscan_api_key) {
        (false, Some(api_url), Some(api_key)) => {
            orchestrator = orchestrator.with_verifier(Arc::new(EtherscanVerifier::new(
                api_url,
                api_key.clone(),
                artifacts,
            )));
        }
        (false, Some(_), None) => warn!("ETHERSCAN_API_KEY is not set, skipping verification"),
        _ => {}
    }

    info!(network = %args.network, ?sender, ledger = ?ledger.path(), "deploying");
    let report = orchestrator.run(&pipeline).await;
    println!("{report}");
    match report.error {
        None => Ok(()),
        Some(err) => Err(err.into()),
    }
}

fn build_pipeline(command: &Command, params: &ParameterSet) -> Result<Pipeline> {
    let pipeline = match command {
        Command::Protocol => pipelines::protocol(params)?,
        Command::Market { symbol } => pipelines::single_market(params, symbol)?,
        Command::RateModels => pipelines::rate_models(params)?,
        Command::Configure => pipelines::configure(params)?,
        Command::UpgradeComptroller => pipelines::upgrade_comptroller(),
    };
    Ok(pipeline)
}
