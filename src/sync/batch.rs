//! Chunked per-exchange order fetching.
//!
//! When the backend has to be queried exchange-by-exchange instead of
//! through the aggregated endpoint, the exchange list is partitioned
//! into fixed-size groups and each group's requests run concurrently.
//! The join completes every request even when some fail, so the result
//! still carries one entry per exchange.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use crate::api::OrdersApi;
use crate::exchanges::LinkedExchange;
use crate::sync::poller::ExchangeOrdersResult;

/// Number of simultaneous outbound requests per group
pub const FETCH_GROUP_SIZE: usize = 3;

pub async fn fetch_orders_per_exchange(
    api: &Arc<dyn OrdersApi>,
    user_id: &str,
    exchanges: &[LinkedExchange],
) -> Vec<ExchangeOrdersResult> {
    let mut results = Vec::with_capacity(exchanges.len());

    for group in exchanges.chunks(FETCH_GROUP_SIZE) {
        debug!(group_size = group.len(), "Fetching order group");
        let fetches = group.iter().map(|exchange| {
            let api = Arc::clone(api);
            async move {
                match api
                    .fetch_exchange_open_orders(user_id, &exchange.id)
                    .await
                {
                    Ok(orders) => ExchangeOrdersResult::fetched(exchange, orders),
                    Err(e) => ExchangeOrdersResult::failed(exchange, e.to_string()),
                }
            }
        });
        results.extend(join_all(fetches).await);
    }

    results
}
