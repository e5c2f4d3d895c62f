//! Open orders endpoints.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ApiClient, ApiError};

/// An open order as reported by the backend. Sourced entirely from the
/// remote API; not persisted beyond the current in-memory batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    #[serde(default)]
    pub exchange_id: String,
    /// Legacy field; older backends set only this.
    #[serde(default)]
    pub exchange: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub status: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Decimal>,
}

impl OpenOrder {
    /// Orders carry both `exchange_id` and the legacy `exchange` field;
    /// consumers must match on either.
    pub fn belongs_to(&self, exchange_id: &str) -> bool {
        self.exchange_id == exchange_id || self.exchange == exchange_id
    }
}

#[derive(Debug, Deserialize)]
struct OpenOrdersResponse {
    orders: Vec<OpenOrder>,
}

/// Seam for the orders endpoints, so the poller can be exercised
/// without a live backend.
#[async_trait]
pub trait OrdersApi: Send + Sync {
    /// All open orders for a user across every linked exchange, flat.
    async fn fetch_open_orders(&self, user_id: &str) -> Result<Vec<OpenOrder>, ApiError>;

    /// Open orders for one linked exchange only.
    async fn fetch_exchange_open_orders(
        &self,
        user_id: &str,
        exchange_id: &str,
    ) -> Result<Vec<OpenOrder>, ApiError>;
}

#[async_trait]
impl OrdersApi for ApiClient {
    async fn fetch_open_orders(&self, user_id: &str) -> Result<Vec<OpenOrder>, ApiError> {
        let url = self.url(&format!("/api/v1/users/{}/orders/open", user_id));
        debug!(user_id, "Fetching open orders");

        let response = self.http().get(&url).send().await?;
        let response = ApiClient::check_status(response).await?;
        let parsed: OpenOrdersResponse = response.json().await?;

        debug!(count = parsed.orders.len(), "Fetched open orders");
        Ok(parsed.orders)
    }

    async fn fetch_exchange_open_orders(
        &self,
        user_id: &str,
        exchange_id: &str,
    ) -> Result<Vec<OpenOrder>, ApiError> {
        let url = self.url(&format!(
            "/api/v1/users/{}/exchanges/{}/orders/open",
            user_id, exchange_id
        ));

        let response = self.http().get(&url).send().await?;
        let response = ApiClient::check_status(response).await?;
        let parsed: OpenOrdersResponse = response.json().await?;
        Ok(parsed.orders)
    }
}
