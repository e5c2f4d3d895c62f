//! Balance aggregation endpoint.
//!
//! One request carries the whole decrypted credential batch; the
//! backend fans out to the exchanges and returns a normalized balance
//! payload with one entry per exchange, successful or not.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::api::{ApiClient, ApiError};
use crate::exchanges::ExchangeCredentials;

#[derive(Serialize)]
struct AggregateRequest<'a> {
    exchanges: &'a [ExchangeCredentials],
}

/// One asset's balance on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd_value: Option<Decimal>,
}

/// Normalized balances for a single exchange, successful or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBalances {
    pub exchange_id: String,
    pub exchange: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub balances: HashMap<String, AssetBalance>,
    #[serde(default)]
    pub total_usd: Decimal,
}

/// Parsed result of one aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSyncResult {
    pub exchanges: Vec<ExchangeBalances>,
    #[serde(default)]
    pub total_usd: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Seam for the aggregation endpoint, so the sync engine can be
/// exercised without a live backend.
#[async_trait]
pub trait BalancesApi: Send + Sync {
    async fn aggregate_balances(
        &self,
        batch: &[ExchangeCredentials],
    ) -> Result<BalanceSyncResult, ApiError>;
}

#[async_trait]
impl BalancesApi for ApiClient {
    async fn aggregate_balances(
        &self,
        batch: &[ExchangeCredentials],
    ) -> Result<BalanceSyncResult, ApiError> {
        let url = self.url("/api/v1/balances/aggregate");
        debug!(exchanges = batch.len(), "Submitting balance aggregation batch");

        let response = self
            .http()
            .post(&url)
            .json(&AggregateRequest { exchanges: batch })
            .send()
            .await?;

        let response = ApiClient::check_status(response).await?;
        let result: BalanceSyncResult = response.json().await?;

        debug!(
            exchanges = result.exchanges.len(),
            total_usd = %result.total_usd,
            "Balance aggregation completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Vec<ExchangeCredentials> {
        vec![ExchangeCredentials {
            exchange_id: "ex-1".to_string(),
            ccxt_id: "binance".to_string(),
            name: "My binance".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            passphrase: None,
        }]
    }

    #[tokio::test]
    async fn test_aggregate_posts_batch_and_parses_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/balances/aggregate"))
            .and(body_partial_json(json!({
                "exchanges": [{"exchangeId": "ex-1", "ccxtId": "binance"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "exchanges": [{
                    "exchange_id": "ex-1",
                    "exchange": "binance",
                    "success": true,
                    "balances": {"BTC": {"free": 1.0, "used": 0.0, "total": 1.0}},
                    "total_usd": 65000.0
                }],
                "total_usd": 65000.0,
                "timestamp": "2024-05-01T12:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let result = client.aggregate_balances(&credentials()).await.unwrap();

        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.exchanges[0].balances["BTC"].total, dec!(1));
    }

    #[tokio::test]
    async fn test_aggregate_maps_401_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/balances/aggregate"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let err = client.aggregate_balances(&credentials()).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_aggregate_surfaces_server_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/balances/aggregate"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        match client.aggregate_balances(&credentials()).await.unwrap_err() {
            ApiError::Status { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "exchanges": [{
                "exchange_id": "ex-1",
                "exchange": "binance",
                "success": true,
                "balances": {
                    "BTC": {"free": 0.5, "used": 0.1, "total": 0.6, "usd_value": 39000.0}
                },
                "total_usd": 39000.0
            }, {
                "exchange_id": "ex-2",
                "exchange": "kraken",
                "success": false,
                "error": "exchange timeout"
            }],
            "total_usd": 39000.0,
            "timestamp": "2024-05-01T12:00:00Z"
        }"#;

        let result: BalanceSyncResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.exchanges.len(), 2);

        let ok = &result.exchanges[0];
        assert!(ok.success);
        assert_eq!(ok.balances["BTC"].total, dec!(0.6));

        let failed = &result.exchanges[1];
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("exchange timeout"));
        assert!(failed.balances.is_empty());
    }

    #[test]
    fn test_request_uses_camel_case_wire_format() {
        let creds = ExchangeCredentials {
            exchange_id: "ex-1".to_string(),
            ccxt_id: "binance".to_string(),
            name: "My binance".to_string(),
            api_key: "k".to_string(),
            api_secret: "s".to_string(),
            passphrase: None,
        };
        let value = serde_json::to_value(&creds).unwrap();
        assert!(value.get("exchangeId").is_some());
        assert!(value.get("ccxtId").is_some());
        assert!(value.get("apiKey").is_some());
        assert!(value.get("passphrase").is_none());
    }
}
