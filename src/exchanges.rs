//! Linked exchange credentials.
//!
//! A linked exchange is a stored record in the `linked_exchanges`
//! collection: which exchange, whose account, and the encrypted API
//! credentials needed to query it. The sync engine only ever reads and
//! decrypts; ownership of the records stays with the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::crypto::{CredentialCipher, CryptoError};
use crate::store::{collections, Record, RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedExchange {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    /// ccxt exchange id, e.g. "binance", "kraken"
    pub exchange_type: String,
    /// Display name chosen by the user
    pub exchange_name: String,
    pub api_key_encrypted: String,
    pub api_secret_encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_passphrase_encrypted: Option<String>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted credential batch entry submitted to the aggregation
/// endpoint. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeCredentials {
    pub exchange_id: String,
    pub ccxt_id: String,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl LinkedExchange {
    /// Decrypt the secret fields into a batch entry. A failure on any
    /// field fails the whole credential.
    pub fn decrypt(&self, cipher: &CredentialCipher) -> Result<ExchangeCredentials, CryptoError> {
        let passphrase = match &self.api_passphrase_encrypted {
            Some(encrypted) => Some(cipher.decrypt(encrypted)?),
            None => None,
        };

        Ok(ExchangeCredentials {
            exchange_id: self.id.clone(),
            ccxt_id: self.exchange_type.clone(),
            name: self.exchange_name.clone(),
            api_key: cipher.decrypt(&self.api_key_encrypted)?,
            api_secret: cipher.decrypt(&self.api_secret_encrypted)?,
            passphrase,
        })
    }

    fn to_record(&self) -> Result<Record, StoreError> {
        Record::from_serializable(self).map_err(StoreError::from)
    }

    fn from_record(record: &Record) -> Option<Self> {
        match record.deserialize::<Self>() {
            Ok(exchange) => Some(exchange),
            Err(e) => {
                warn!(id = %record.id, "Skipping malformed linked exchange record: {}", e);
                None
            }
        }
    }
}

/// Typed access to the `linked_exchanges` collection.
#[derive(Clone)]
pub struct ExchangeRepository {
    store: Arc<dyn RecordStore>,
}

impl ExchangeRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<LinkedExchange> {
        self.store
            .find_all(collections::LINKED_EXCHANGES)
            .await
            .iter()
            .filter_map(LinkedExchange::from_record)
            .filter(|exchange| exchange.user_id == user_id)
            .collect()
    }

    /// Active credentials only, the set a sync operates on.
    pub async fn active_for_user(&self, user_id: &str) -> Vec<LinkedExchange> {
        self.list_for_user(user_id)
            .await
            .into_iter()
            .filter(|exchange| exchange.is_active)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<LinkedExchange> {
        self.store
            .find_by_id(collections::LINKED_EXCHANGES, id)
            .await
            .as_ref()
            .and_then(LinkedExchange::from_record)
    }

    /// Insert or replace a linked exchange, stamping `updated_at`.
    pub async fn upsert(&self, mut exchange: LinkedExchange) -> Result<LinkedExchange, StoreError> {
        exchange.updated_at = Utc::now();
        let saved = self
            .store
            .save(collections::LINKED_EXCHANGES, exchange.to_record()?)
            .await?;
        exchange.id = saved.id;
        Ok(exchange)
    }

    pub async fn unlink(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(collections::LINKED_EXCHANGES, id).await
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let mut partial = serde_json::Map::new();
        partial.insert("is_active".to_string(), serde_json::json!(active));
        partial.insert(
            "updated_at".to_string(),
            serde_json::json!(Utc::now()),
        );
        Ok(self
            .store
            .update(collections::LINKED_EXCHANGES, id, partial)
            .await?
            .is_some())
    }

    /// Record the time of the last successful sync for one exchange.
    pub async fn mark_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut partial = serde_json::Map::new();
        partial.insert("last_sync_at".to_string(), serde_json::json!(at));
        self.store
            .update(collections::LINKED_EXCHANGES, id, partial)
            .await?;
        Ok(())
    }

    /// Replace a user's whole credential set with an upsert-diff:
    /// survivors are saved in place, absentees deleted. A concurrent
    /// reader never observes a transiently empty collection.
    pub async fn replace_all_for_user(
        &self,
        user_id: &str,
        exchanges: Vec<LinkedExchange>,
    ) -> Result<Vec<LinkedExchange>, StoreError> {
        let existing = self.list_for_user(user_id).await;

        let mut saved = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            saved.push(self.upsert(exchange).await?);
        }

        for old in existing {
            if !saved.iter().any(|e| e.id == old.id) {
                self.unlink(&old.id).await?;
            }
        }

        Ok(saved)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::linked_exchange;
    use super::*;
    use crate::store::SqliteRecordStore;

    fn repo() -> (ExchangeRepository, CredentialCipher) {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        (ExchangeRepository::new(store), CredentialCipher::new("test-pass").unwrap())
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let (repo, cipher) = repo();
        let exchange = linked_exchange("ex-1", "user-1", "binance", &cipher);

        let saved = repo.upsert(exchange.clone()).await.unwrap();
        let loaded = repo.get("ex-1").await.unwrap();

        assert_eq!(loaded.id, saved.id);
        assert_eq!(loaded.exchange_type, "binance");
        assert_eq!(
            cipher.decrypt(&loaded.api_key_encrypted).unwrap(),
            "ex-1-key"
        );
    }

    #[tokio::test]
    async fn test_active_filter_and_toggle() {
        let (repo, cipher) = repo();
        repo.upsert(linked_exchange("ex-1", "user-1", "binance", &cipher))
            .await
            .unwrap();
        repo.upsert(linked_exchange("ex-2", "user-1", "kraken", &cipher))
            .await
            .unwrap();
        repo.upsert(linked_exchange("ex-3", "user-2", "kraken", &cipher))
            .await
            .unwrap();

        assert_eq!(repo.active_for_user("user-1").await.len(), 2);

        assert!(repo.set_active("ex-2", false).await.unwrap());
        assert_eq!(repo.active_for_user("user-1").await.len(), 1);
        assert_eq!(repo.list_for_user("user-1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_synced_sets_timestamp() {
        let (repo, cipher) = repo();
        repo.upsert(linked_exchange("ex-1", "user-1", "binance", &cipher))
            .await
            .unwrap();

        let at = Utc::now();
        repo.mark_synced("ex-1", at).await.unwrap();

        let loaded = repo.get("ex-1").await.unwrap();
        assert_eq!(loaded.last_sync_at, Some(at));
    }

    #[tokio::test]
    async fn test_replace_all_upserts_and_prunes() {
        let (repo, cipher) = repo();
        repo.upsert(linked_exchange("ex-1", "user-1", "binance", &cipher))
            .await
            .unwrap();
        repo.upsert(linked_exchange("ex-2", "user-1", "kraken", &cipher))
            .await
            .unwrap();

        let replacement = vec![
            linked_exchange("ex-1", "user-1", "binance", &cipher),
            linked_exchange("ex-4", "user-1", "okx", &cipher),
        ];
        repo.replace_all_for_user("user-1", replacement).await.unwrap();

        let remaining = repo.list_for_user("user-1").await;
        let mut ids: Vec<_> = remaining.iter().map(|e| e.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["ex-1", "ex-4"]);
    }

    #[tokio::test]
    async fn test_decrypt_produces_batch_entry() {
        let cipher = CredentialCipher::new("test-pass").unwrap();
        let mut exchange = linked_exchange("ex-1", "user-1", "kucoin", &cipher);
        exchange.api_passphrase_encrypted = Some(cipher.encrypt("trade-pass").unwrap());

        let creds = exchange.decrypt(&cipher).unwrap();
        assert_eq!(creds.exchange_id, "ex-1");
        assert_eq!(creds.ccxt_id, "kucoin");
        assert_eq!(creds.api_key, "ex-1-key");
        assert_eq!(creds.api_secret, "ex-1-secret");
        assert_eq!(creds.passphrase.as_deref(), Some("trade-pass"));
    }

    #[tokio::test]
    async fn test_decrypt_with_wrong_passphrase_fails() {
        let cipher = CredentialCipher::new("test-pass").unwrap();
        let exchange = linked_exchange("ex-1", "user-1", "binance", &cipher);

        let wrong = CredentialCipher::new("other-pass").unwrap();
        assert!(exchange.decrypt(&wrong).is_err());
    }
}
