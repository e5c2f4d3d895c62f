use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tracing::info;

use crate::api::{ApiClient, BalanceSyncResult};
use crate::cli::open_store;
use crate::config::Settings;
use crate::crypto::CredentialCipher;
use crate::data_paths::DataPaths;
use crate::exchanges::ExchangeRepository;
use crate::store::RecordStore;
use crate::sync::{OpenOrdersPoller, SyncEngine};

#[derive(Args)]
pub struct SyncArgs {
    /// User to sync
    #[arg(long, default_value = "default")]
    pub user: String,

    /// Keep running: sync on a fixed interval and refresh open orders
    /// whenever balances actually change
    #[arg(long)]
    pub watch: bool,
}

pub async fn execute(settings: &Settings, data_paths: &DataPaths, args: SyncArgs) -> Result<()> {
    let store: Arc<dyn RecordStore> = open_store(settings, data_paths)?;
    let cipher = CredentialCipher::from_env_or_prompt()?;
    let api = Arc::new(ApiClient::new(&settings.api_url));

    let engine = SyncEngine::new(Arc::clone(&store), api.clone(), cipher);

    if !args.watch {
        match engine.sync_now(Some(&args.user)).await? {
            Some(result) => print_summary(&result),
            None => println!("Nothing to sync: no active linked exchanges."),
        }
        return Ok(());
    }

    // Watch mode: periodic balance sync, plus reactive order refresh
    // driven by republished results.
    let repo = ExchangeRepository::new(Arc::clone(&store));
    let poller = OpenOrdersPoller::new(repo, api, &args.user);

    let mut results = engine.subscribe();
    let reactive = {
        let poller = poller.clone();
        tokio::spawn(async move {
            while results.changed().await.is_ok() {
                let snapshot = results.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    print_summary(&snapshot);
                    poller.balances_changed(&snapshot);
                }
            }
        })
    };

    engine.start(&args.user).await;
    info!("Watching for balance changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    engine.stop();
    poller.shutdown();
    reactive.abort();
    println!("\nStopped.");

    Ok(())
}

fn print_summary(result: &BalanceSyncResult) {
    println!(
        "Synced {} exchange(s), total {} USD",
        result.exchanges.len(),
        result.total_usd
    );
    for entry in &result.exchanges {
        if entry.success {
            println!(
                "  {} {}: {} asset(s), {} USD",
                "✓".green(),
                entry.exchange,
                entry.balances.len(),
                entry.total_usd
            );
        } else {
            println!(
                "  {} {}: {}",
                "✗".red(),
                entry.exchange,
                entry.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
