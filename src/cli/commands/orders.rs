use anyhow::Result;
use clap::Args;
use comfy_table::Table;
use std::sync::Arc;

use crate::api::{ApiClient, OrdersApi};
use crate::cli::open_store;
use crate::config::Settings;
use crate::data_paths::DataPaths;
use crate::exchanges::ExchangeRepository;
use crate::store::RecordStore;
use crate::sync::poller::ExchangeOrdersResult;
use crate::sync::{fetch_orders_per_exchange, OpenOrdersPoller};

#[derive(Args)]
pub struct OrdersArgs {
    /// User whose orders to fetch
    #[arg(long, default_value = "default")]
    pub user: String,

    /// Query each exchange separately (bounded-concurrency groups)
    /// instead of the aggregated endpoint
    #[arg(long)]
    pub per_exchange: bool,
}

pub async fn execute(settings: &Settings, data_paths: &DataPaths, args: OrdersArgs) -> Result<()> {
    let store: Arc<dyn RecordStore> = open_store(settings, data_paths)?;
    let repo = ExchangeRepository::new(Arc::clone(&store));
    let api: Arc<dyn OrdersApi> = Arc::new(ApiClient::new(&settings.api_url));

    let results = if args.per_exchange {
        let exchanges = repo.list_for_user(&args.user).await;
        fetch_orders_per_exchange(&api, &args.user, &exchanges).await
    } else {
        // manual invocation always hits the network
        let poller = OpenOrdersPoller::new(repo, api, &args.user);
        match poller.refresh_now().await {
            Some(results) => results,
            None => {
                println!("An order fetch is already in progress.");
                return Ok(());
            }
        }
    };

    if results.is_empty() {
        println!("No linked exchanges. Use `coinfolio link` to add one.");
        return Ok(());
    }

    print_results(&results);
    Ok(())
}

fn print_results(results: &[ExchangeOrdersResult]) {
    for result in results {
        if !result.success {
            println!(
                "{}: fetch failed: {}",
                result.exchange_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }

        println!("{}: {} open order(s)", result.exchange_name, result.orders_count);
        if result.orders.is_empty() {
            continue;
        }

        let mut table = Table::new();
        table.set_header(vec![
            "ID", "Symbol", "Side", "Type", "Price", "Amount", "Filled", "Status",
        ]);
        for order in &result.orders {
            table.add_row(vec![
                order.id.clone(),
                order.symbol.clone(),
                order.side.clone(),
                order.order_type.clone(),
                order.price.to_string(),
                order.amount.to_string(),
                order.filled.to_string(),
                order.status.clone(),
            ]);
        }
        println!("{table}");
    }
}
