//! Runtime settings resolved from environment variables.
//!
//! `.env` files are loaded by `main` via dotenvy before any settings are
//! read, so deployments can keep the API URL and storage toggle next to
//! the data directory.

use std::env;

/// Default backend API base URL
pub const DEFAULT_API_URL: &str = "https://api.coinfolio.dev";

/// Environment variable overriding the backend API base URL
pub const ENV_API_URL: &str = "COINFOLIO_API_URL";

/// Environment variable forcing the flat key-indexed storage engine.
/// Any non-empty value other than "0" or "false" disables the structured
/// engine entirely.
pub const ENV_FLAT_STORE_ONLY: &str = "COINFOLIO_FLAT_STORE_ONLY";

/// Environment variable supplying the credential passphrase
/// non-interactively (watch mode, CI).
pub const ENV_PASSPHRASE: &str = "COINFOLIO_PASSPHRASE";

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Backend API base URL (no trailing slash)
    pub api_url: String,
    /// Force the fallback storage engine regardless of capability
    pub flat_store_only: bool,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn from_env() -> Self {
        let api_url = env::var(ENV_API_URL)
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let flat_store_only = env::var(ENV_FLAT_STORE_ONLY)
            .map(|v| {
                let v = v.trim();
                !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
            })
            .unwrap_or(false);

        Self {
            api_url,
            flat_store_only,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            flat_store_only: false,
        }
    }
}
