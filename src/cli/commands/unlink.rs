use anyhow::{anyhow, Result};
use clap::Args;
use owo_colors::OwoColorize;

use crate::cli::open_store;
use crate::config::Settings;
use crate::data_paths::DataPaths;
use crate::exchanges::ExchangeRepository;

#[derive(Args)]
pub struct UnlinkArgs {
    /// Linked exchange id (see `coinfolio exchanges`)
    pub id: String,
}

pub async fn execute(settings: &Settings, data_paths: &DataPaths, args: UnlinkArgs) -> Result<()> {
    let store = open_store(settings, data_paths)?;
    let repo = ExchangeRepository::new(store);

    if repo.unlink(&args.id).await? {
        println!("{} Unlinked exchange {}", "✓".green(), args.id);
        Ok(())
    } else {
        Err(anyhow!("No linked exchange with id {}", args.id))
    }
}
