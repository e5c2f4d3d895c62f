//! HTTP client for the backend REST API.
//!
//! The backend owns the exchange integrations; this client only speaks
//! the two endpoints the sync layer needs: balance aggregation and open
//! orders. Timeout behavior is inherited from reqwest.

pub mod balances;
pub mod orders;

pub use balances::{AssetBalance, BalanceSyncResult, BalancesApi, ExchangeBalances};
pub use orders::{OpenOrder, OrdersApi};

use thiserror::Error;

/// API failure taxonomy. 401 is split out because an authentication
/// failure must never enter the automatic-retry path.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("authentication rejected (401)")]
    Unauthorized,
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Map a non-success status into the error taxonomy.
    pub(crate) async fn check_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "No error details".to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}
