mod actions;
mod alert;
mod config;
mod crypto;
mod event;
mod filter;
mod registry;
mod relay;
mod server;
mod storage;
#[cfg(test)]
mod testing;
mod upstream;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::crypto::BridgeKeys;
use crate::registry::Registry;
use crate::server::App;
use crate::storage::Store;
use crate::upstream::{RelayClient, WsClient};

/// Push bridge for nostr alerts: accepts encrypted alert subscriptions over
/// the relay protocol and forwards matching upstream events to webhooks.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the env file holding settings
    #[arg(long, default_value = ".env")]
    env: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the env file and store directories
    Init,
    /// Run the bridge
    Serve,
    /// Print the bridge pubkey clients should encrypt to
    Pubkey,
    /// List stored alerts
    Alerts,
}

async fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Init) {
        ensure_env_file(&cli.env)?;
    }
    let settings = Settings::from_env(&cli.env)?;
    let store = Store::new(&settings.store_root);
    let keys = BridgeKeys::from_secret(&settings.secret)?;

    match cli.command {
        Commands::Init => {
            store.init()?;
            println!("initialized {}", cli.env.display());
            println!("pubkey: {}", keys.public_hex());
        }
        Commands::Serve => {
            store.init()?;
            info!(pubkey = %keys.public_hex(), "starting bridge");
            let client =
                Arc::new(WsClient::new(settings.tor_socks.clone())) as Arc<dyn RelayClient>;
            let registry = Arc::new(Registry::new(store.clone(), keys.clone(), client));
            for alert in store.list_all()? {
                if let Err(e) = registry.register(&alert).await {
                    warn!(address = %alert.address, error = %e, "skipping stored alert");
                }
            }
            let app = Arc::new(App::new(store, registry, keys));
            server::serve(&settings.bind, app, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }
        Commands::Pubkey => {
            println!("{}", keys.public_hex());
        }
        Commands::Alerts => {
            for alert in store.list_all()? {
                println!("{}\t{}\t{}", alert.created_at, alert.pubkey, alert.address);
            }
        }
    }
    Ok(())
}

/// Write a fresh env file with a generated secret unless one already exists.
fn ensure_env_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let secret = BridgeKeys::generate().secret_hex();
    let contents = format!(
        "STORE_ROOT=./data\nBIND=127.0.0.1:7700\nSECRET={secret}\nTOR_SOCKS=\n"
    );
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    run(Cli::parse()).await
}
