//! Local record storage.
//!
//! Records live in named collections behind one uniform CRUD contract
//! ([`RecordStore`]), served by either of two engines: a structured
//! SQLite database or a flat key-indexed RocksDB store. The hybrid
//! selector picks the engine once at startup; call sites never know
//! which one is active.

pub mod adapter;
pub mod hybrid;
pub mod kv;
pub mod record;
pub mod sqlite;

pub use adapter::RecordStore;
pub use hybrid::{ActiveEngine, HybridStore, StorageCapabilities};
pub use kv::KvRecordStore;
pub use record::Record;
pub use sqlite::SqliteRecordStore;

use thiserror::Error;

/// Storage collection names. Case-sensitive, fixed set; a collection
/// exists implicitly once the first record is written to it.
pub mod collections {
    pub const LINKED_EXCHANGES: &str = "linked_exchanges";
    pub const BALANCE_SNAPSHOTS: &str = "balance_snapshots";
    pub const BALANCE_HISTORY: &str = "balance_history";
    pub const ORDERS: &str = "orders";
    pub const POSITIONS: &str = "positions";
    pub const STRATEGIES: &str = "strategies";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const WATCHLIST: &str = "watchlist";
    pub const PRICE_ALERTS: &str = "price_alerts";

    pub const ALL: &[&str] = &[
        LINKED_EXCHANGES,
        BALANCE_SNAPSHOTS,
        BALANCE_HISTORY,
        ORDERS,
        POSITIONS,
        STRATEGIES,
        NOTIFICATIONS,
        WATCHLIST,
        PRICE_ALERTS,
    ];
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    Kv(#[from] rocksdb::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
