pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod data_paths;
pub mod exchanges;
pub mod logging;
pub mod store;
pub mod sync;

pub use store::{HybridStore, Record, RecordStore, StorageCapabilities};
pub use sync::{OpenOrdersPoller, SyncEngine};
