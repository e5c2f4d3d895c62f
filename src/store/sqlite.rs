//! Structured storage engine backed by SQLite.
//!
//! Records are rows in a single `records` table with typed columns and
//! an index on the collection name, so lookups by collection or id go
//! through the engine's indexes rather than a full scan. Schema changes
//! are tracked as numbered migrations via `PRAGMA user_version`.

use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info};

use async_trait::async_trait;

use crate::store::{Record, RecordStore, StoreError};

/// Ordered schema migrations. The current schema version is the length
/// of this list; each entry is applied exactly once.
const MIGRATIONS: &[&str] = &[
    // v1: records table with typed columns
    "CREATE TABLE records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );
    CREATE INDEX idx_records_collection ON records(collection);",
];

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the store at the given path and bring the
    /// schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        info!("Structured store initialized");
        Ok(store)
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        debug!("In-memory structured store initialized");
        Ok(store)
    }

    /// Apply any pending migrations.
    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let version: i64 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(version as usize) {
            conn.execute_batch(migration)?;
            conn.pragma_update(None, "user_version", (i + 1) as i64)?;
            debug!("Applied schema migration v{}", i + 1);
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn schema_version(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    fn decode_body(id: &str, body: &str) -> Result<Record, StoreError> {
        let fields: Map<String, Value> = serde_json::from_str(body)?;
        Ok(Record::with_id(id, fields))
    }

    fn try_get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(body) => Ok(Some(Self::decode_body(id, &body)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_scan(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt =
            conn.prepare("SELECT id, body FROM records WHERE collection = ?1")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, body) = row?;
            records.push(Self::decode_body(&id, &body)?);
        }
        Ok(records)
    }

    fn try_put(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let body = serde_json::to_string(&record.fields)?;
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO records (collection, id, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(collection, id)
             DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![collection, record.id, body, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        let record = record.ensure_id();
        self.try_put(collection, &record)?;
        Ok(record)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Option<Record> {
        match self.try_get(collection, id) {
            Ok(found) => found,
            Err(e) => {
                error!(collection, id, "Structured store read failed: {}", e);
                None
            }
        }
    }

    async fn find_all(&self, collection: &str) -> Vec<Record> {
        match self.try_scan(collection) {
            Ok(records) => records,
            Err(e) => {
                error!(collection, "Structured store scan failed: {}", e);
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
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(removed > 0)
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
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM records WHERE collection = ?1",
            params![collection],
        )?;
        Ok(())
    }
}
