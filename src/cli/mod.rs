//! Command-line interface.
//!
//! Thin presentation glue over the library: every subcommand opens the
//! hybrid record store, runs one operation against the sync layer, and
//! prints the outcome. Logging is initialized here so command output
//! and the per-session log file stay consistent.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

pub mod commands;

use crate::config::Settings;
use crate::data_paths::{DataPaths, DEFAULT_DATA_DIR};
use crate::logging::{init_logging, LogMode, LoggingConfig};
use crate::store::{HybridStore, StorageCapabilities};

use commands::exchanges::ExchangesArgs;
use commands::link::LinkArgs;
use commands::orders::OrdersArgs;
use commands::status::StatusArgs;
use commands::sync::SyncArgs;
use commands::unlink::UnlinkArgs;

#[derive(Parser)]
#[command(name = "coinfolio")]
#[command(version)]
#[command(about = "Local-first portfolio sync for linked crypto exchanges", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory path (default: ./data)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Log to file only, keep the console clean
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Link an exchange account (credentials are stored encrypted)
    Link(LinkArgs),
    /// Remove a linked exchange
    Unlink(UnlinkArgs),
    /// List linked exchanges
    Exchanges(ExchangesArgs),
    /// Sync balances once, or continuously with --watch
    Sync(SyncArgs),
    /// Fetch open orders across all linked exchanges
    Orders(OrdersArgs),
    /// Show storage engine and collection diagnostics
    Status(StatusArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let data_paths = DataPaths::new(&self.data_dir);
        data_paths.ensure_directories()?;

        let mode = if self.quiet {
            LogMode::FileOnly
        } else {
            LogMode::ConsoleAndFile
        };
        init_logging(LoggingConfig::new(mode, data_paths.clone()))?;

        let settings = Settings::from_env();

        match self.command {
            Commands::Link(args) => commands::link::execute(&settings, &data_paths, args).await,
            Commands::Unlink(args) => {
                commands::unlink::execute(&settings, &data_paths, args).await
            }
            Commands::Exchanges(args) => {
                commands::exchanges::execute(&settings, &data_paths, args).await
            }
            Commands::Sync(args) => commands::sync::execute(&settings, &data_paths, args).await,
            Commands::Orders(args) => {
                commands::orders::execute(&settings, &data_paths, args).await
            }
            Commands::Status(args) => {
                commands::status::execute(&settings, &data_paths, args).await
            }
        }
    }
}

/// Open the record store behind the capability-probed engine selection.
pub(crate) fn open_store(
    settings: &Settings,
    data_paths: &DataPaths,
) -> Result<Arc<HybridStore>> {
    let caps = StorageCapabilities::detect(settings);
    let store = HybridStore::open(data_paths, &caps)?;
    Ok(Arc::new(store))
}
