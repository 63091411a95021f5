#![forbid(unsafe_code)]
//! Standalone PoQChain node with in-process transport and blob storage.

use clap::Parser;
use colored::*;
use poqchain::blobstore::MemoryBlobStore;
use poqchain::config::load_config;
use poqchain::crypto::KeyPair;
use poqchain::network::InMemoryPubSub;
use poqchain::node::Node;
use poqchain::quality::WeightedQualityOracle;
use poqchain::wallet::Wallet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the node configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Log filter, overriding the configured level (e.g. "debug" or "poqchain=trace")
    #[arg(long)]
    log_level: Option<String>,
    /// Hex secret key of the node wallet; a fresh key is generated when absent
    #[arg(long)]
    secret_key: Option<String>,
    /// Register this many local validators ("validator-0", "validator-1", ...)
    #[arg(long, default_value_t = 3)]
    validators: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let wallet = match &cli.secret_key {
        Some(secret) => Wallet::from_keypair(KeyPair::from_secret_bytes(&hex::decode(secret)?)?),
        None => Wallet::new()?,
    };

    println!("{}", "PoQChain Node".bright_cyan().bold());
    println!("{}", "-------------".bright_cyan());
    println!("  {} {}", "Network:".bright_green(), config.node.network_id.bright_white());
    println!("  {} {}", "Address:".bright_green(), wallet.address().bright_white());
    println!(
        "  {} {}",
        "Mining:".bright_green(),
        if config.mining.enabled {
            format!("every {}s", config.mining.interval_secs).bright_white()
        } else {
            "disabled".yellow()
        }
    );
    println!();

    let pubsub = Arc::new(InMemoryPubSub::default());
    let node = Arc::new(Node::new(
        config,
        wallet,
        Arc::new(WeightedQualityOracle::default()),
        Arc::new(MemoryBlobStore::new()),
        pubsub,
    ));

    for i in 0..cli.validators {
        node.register_validator(&format!("validator-{}", i)).await?;
    }
    info!(validators = cli.validators, "Local validators registered");

    tokio::select! {
        _ = node.clone().run() => {}
        _ = tokio::signal::ctrl_c() => {
            node.miner().cancel();
            info!("Shutting down");
        }
    }

    Ok(())
}
