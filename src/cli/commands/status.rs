use anyhow::Result;
use clap::Args;
use comfy_table::Table;

use crate::cli::open_store;
use crate::config::Settings;
use crate::data_paths::DataPaths;
use crate::store::{collections, RecordStore};

#[derive(Args)]
pub struct StatusArgs {}

pub async fn execute(
    settings: &Settings,
    data_paths: &DataPaths,
    _args: StatusArgs,
) -> Result<()> {
    let store = open_store(settings, data_paths)?;

    println!("Data directory: {}", data_paths.root().display());
    println!("Active storage engine: {}", store.active_engine());

    let mut table = Table::new();
    table.set_header(vec!["Collection", "Records"]);
    for collection in collections::ALL {
        let count = store.find_all(collection).await.len();
        table.add_row(vec![collection.to_string(), count.to_string()]);
    }
    println!("{table}");

    Ok(())
}
