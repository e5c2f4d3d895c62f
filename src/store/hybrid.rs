//! Engine selection for the record store.
//!
//! The structured SQLite engine needs a working native bridge, which
//! not every deployment target has. The selection happens exactly once
//! at startup: probe capability, try the structured engine, fall back
//! to the flat key-indexed engine on any initialization failure. Call
//! sites only ever see the [`RecordStore`] contract.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use async_trait::async_trait;

use crate::config::Settings;
use crate::data_paths::DataPaths;
use crate::store::{KvRecordStore, Record, RecordStore, SqliteRecordStore, StoreError};

/// Which engine ended up backing the store. Diagnostics only; business
/// logic must never branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveEngine {
    Sqlite,
    FlatKv,
}

impl std::fmt::Display for ActiveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveEngine::Sqlite => write!(f, "sqlite"),
            ActiveEngine::FlatKv => write!(f, "flat-kv"),
        }
    }
}

/// Runtime capability probe for the structured engine.
#[derive(Debug, Clone)]
pub struct StorageCapabilities {
    pub structured_available: bool,
}

impl StorageCapabilities {
    pub fn detect(settings: &Settings) -> Self {
        Self {
            structured_available: !settings.flat_store_only,
        }
    }
}

/// Adapter-shaped facade over whichever engine the probe selected.
pub struct HybridStore {
    engine: ActiveEngine,
    inner: Arc<dyn RecordStore>,
}

impl HybridStore {
    /// Bind to the structured engine when capable, falling back to the
    /// flat engine without re-throwing. Only a failure to open the
    /// fallback itself is an error.
    pub fn open(paths: &DataPaths, caps: &StorageCapabilities) -> Result<Self, StoreError> {
        if caps.structured_available {
            match SqliteRecordStore::open(paths.sqlite_store()) {
                Ok(store) => {
                    info!("Record store bound to structured engine");
                    return Ok(Self {
                        engine: ActiveEngine::Sqlite,
                        inner: Arc::new(store),
                    });
                }
                Err(e) => {
                    warn!("Structured engine unavailable, falling back to flat store: {}", e);
                }
            }
        }

        let store = KvRecordStore::open(paths.kv_store())?;
        info!("Record store bound to flat key-indexed engine");
        Ok(Self {
            engine: ActiveEngine::FlatKv,
            inner: Arc::new(store),
        })
    }

    /// Which engine is active. For diagnostics output only.
    pub fn active_engine(&self) -> ActiveEngine {
        self.engine
    }
}

#[async_trait]
impl RecordStore for HybridStore {
    async fn save(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        self.inner.save(collection, record).await
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Option<Record> {
        self.inner.find_by_id(collection, id).await
    }

    async fn find_all(&self, collection: &str) -> Vec<Record> {
        self.inner.find_all(collection).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError> {
        self.inner.update(collection, id, partial).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &(dyn Fn(&Record) -> bool + Send + Sync),
    ) -> Vec<Record> {
        self.inner.query(collection, predicate).await
    }

    async fn clear_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.inner.clear_collection(collection).await
    }
}
