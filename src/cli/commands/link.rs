use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::info;

use crate::cli::open_store;
use crate::config::Settings;
use crate::crypto::CredentialCipher;
use crate::data_paths::DataPaths;
use crate::exchanges::{ExchangeRepository, LinkedExchange};

#[derive(Args)]
pub struct LinkArgs {
    /// User the exchange belongs to
    #[arg(long, default_value = "default")]
    pub user: String,

    /// ccxt exchange id (e.g. binance, kraken, kucoin)
    #[arg(long)]
    pub exchange: String,

    /// Display name (defaults to the exchange id)
    #[arg(long)]
    pub name: Option<String>,

    /// The exchange requires an API passphrase in addition to key and
    /// secret
    #[arg(long)]
    pub with_passphrase: bool,
}

pub async fn execute(settings: &Settings, data_paths: &DataPaths, args: LinkArgs) -> Result<()> {
    let store = open_store(settings, data_paths)?;
    let repo = ExchangeRepository::new(store);
    let cipher = CredentialCipher::from_env_or_prompt()?;

    let api_key = rpassword::prompt_password("API key: ")?;
    let api_secret = rpassword::prompt_password("API secret: ")?;
    if api_key.is_empty() || api_secret.is_empty() {
        return Err(anyhow!("API key and secret cannot be empty"));
    }

    let api_passphrase_encrypted = if args.with_passphrase {
        let passphrase = rpassword::prompt_password("API passphrase: ")?;
        Some(cipher.encrypt(&passphrase)?)
    } else {
        None
    };

    let now = Utc::now();
    let exchange = LinkedExchange {
        id: String::new(),
        user_id: args.user.clone(),
        exchange_name: args.name.unwrap_or_else(|| args.exchange.clone()),
        exchange_type: args.exchange,
        api_key_encrypted: cipher.encrypt(&api_key)?,
        api_secret_encrypted: cipher.encrypt(&api_secret)?,
        api_passphrase_encrypted,
        is_active: true,
        last_sync_at: None,
        created_at: now,
        updated_at: now,
    };

    let saved = repo.upsert(exchange).await?;
    info!(id = %saved.id, exchange = %saved.exchange_type, "Linked exchange");
    println!(
        "{} Linked {} as {} (id: {})",
        "✓".green(),
        saved.exchange_type,
        saved.exchange_name,
        saved.id
    );

    Ok(())
}
