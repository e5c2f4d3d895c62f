use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::store::{Record, StoreError};

/// Uniform CRUD contract over a named collection of identified records.
///
/// The failure policy is asymmetric on purpose: read operations catch
/// and log I/O failures and degrade to a null/empty/false result, while
/// write operations propagate the error so callers can retry or surface
/// it. A failed read is survivable; a silently swallowed write is not.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or fully replace a record. The returned record carries
    /// the resolved identifier (engine-assigned if the caller omitted
    /// one).
    async fn save(&self, collection: &str, record: Record) -> Result<Record, StoreError>;

    /// Look up a record by id. Never errors; "not found" and read
    /// failure both come back as None.
    async fn find_by_id(&self, collection: &str, id: &str) -> Option<Record>;

    /// All records in a collection. Order is not guaranteed.
    async fn find_all(&self, collection: &str) -> Vec<Record>;

    /// Merge partial fields into an existing record. Ok(None) when the
    /// record is absent.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError>;

    /// Remove a record. True when something was deleted.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Full-scan filter. The flat engine has no index support, so the
    /// contract only promises filter-correctness, not performance.
    async fn query(
        &self,
        collection: &str,
        predicate: &(dyn Fn(&Record) -> bool + Send + Sync),
    ) -> Vec<Record>;

    /// Drop every record in a collection.
    async fn clear_collection(&self, collection: &str) -> Result<(), StoreError>;
}
