use anyhow::Result;
use clap::Args;
use comfy_table::Table;

use crate::cli::open_store;
use crate::config::Settings;
use crate::data_paths::DataPaths;
use crate::exchanges::ExchangeRepository;

#[derive(Args)]
pub struct ExchangesArgs {
    /// User whose exchanges to list
    #[arg(long, default_value = "default")]
    pub user: String,
}

pub async fn execute(
    settings: &Settings,
    data_paths: &DataPaths,
    args: ExchangesArgs,
) -> Result<()> {
    let store = open_store(settings, data_paths)?;
    let repo = ExchangeRepository::new(store);

    let exchanges = repo.list_for_user(&args.user).await;
    if exchanges.is_empty() {
        println!("No linked exchanges. Use `coinfolio link` to add one.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Exchange", "Active", "Last sync"]);
    for exchange in &exchanges {
        table.add_row(vec![
            exchange.id.clone(),
            exchange.exchange_name.clone(),
            exchange.exchange_type.clone(),
            if exchange.is_active { "yes" } else { "no" }.to_string(),
            exchange
                .last_sync_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        ]);
    }
    println!("{table}");

    Ok(())
}
