//! Flat key-indexed storage engine.
//!
//! One RocksDB instance holds every collection. Keys are
//! `<collection> 0x00 <record id>`, values are the JSON-encoded record
//! fields. There are no secondary indexes; queries are prefix scans.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::error;

use async_trait::async_trait;

use crate::store::{Record, RecordStore, StoreError};

/// Separator between the collection name and the record id. Collection
/// names are drawn from a fixed set and never contain a NUL byte.
const KEY_SEPARATOR: u8 = 0x00;

pub struct KvRecordStore {
    db: DB,
}

impl KvRecordStore {
    /// Open (or create) the store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(1000);
        opts.set_use_fsync(false);
        opts.set_bytes_per_sync(8388608);
        opts.optimize_for_point_lookup(1024);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn record_key(collection: &str, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(collection.len() + 1 + id.len());
        key.extend_from_slice(collection.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn collection_prefix(collection: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(collection.len() + 1);
        prefix.extend_from_slice(collection.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    fn decode_record(id_bytes: &[u8], value: &[u8]) -> Result<Record, StoreError> {
        let fields: Map<String, Value> = serde_json::from_slice(value)?;
        Ok(Record::with_id(String::from_utf8_lossy(id_bytes), fields))
    }

    fn try_get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        match self.db.get(Self::record_key(collection, id))? {
            Some(bytes) => Ok(Some(Self::decode_record(id.as_bytes(), &bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan all records in a collection with prefix filtering.
    fn try_scan(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let prefix = Self::collection_prefix(collection);
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            let (k, v) = item?;

            // Stop when we move past our prefix
            if !k.starts_with(&prefix) {
                break;
            }

            results.push(Self::decode_record(&k[prefix.len()..], &v)?);
        }

        Ok(results)
    }

    fn try_put(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&record.fields)?;
        self.db.put(Self::record_key(collection, &record.id), value)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for KvRecordStore {
    async fn save(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        let record = record.ensure_id();
        self.try_put(collection, &record)?;
        Ok(record)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Option<Record> {
        match self.try_get(collection, id) {
            Ok(found) => found,
            Err(e) => {
                error!(collection, id, "Flat store read failed: {}", e);
                None
            }
        }
    }

    async fn find_all(&self, collection: &str) -> Vec<Record> {
        match self.try_scan(collection) {
            Ok(records) => records,
            Err(e) => {
                error!(collection, "Flat store scan failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError> {
        let mut record = match self.try_get(collection, id)? {
            Some(record) => record,
            None => return Ok(None),
        };

        record.merge(partial);
        self.try_put(collection, &record)?;
        Ok(Some(record))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let key = Self::record_key(collection, id);
        if self.db.get(&key)?.is_none() {
            return Ok(false);
        }
        self.db.delete(key)?;
        Ok(true)
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &(dyn Fn(&Record) -> bool + Send + Sync),
    ) -> Vec<Record> {
        self.find_all(collection)
            .await
            .into_iter()
            .filter(|record| predicate(record))
            .collect()
    }

    async fn clear_collection(&self, collection: &str) -> Result<(), StoreError> {
        let prefix = Self::collection_prefix(collection);
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));

        let mut batch = WriteBatch::default();
        for item in iter {
            let (k, _) = item?;
            if !k.starts_with(&prefix) {
                break;
            }
            batch.delete(k);
        }
        self.db.write(batch)?;
        Ok(())
    }
}
