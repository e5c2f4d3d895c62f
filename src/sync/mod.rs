//! Background synchronization.
//!
//! [`SyncEngine`] owns the periodic balance sync: it decrypts the
//! stored exchange credentials, submits them to the aggregation
//! endpoint in one batch, and republishes the normalized result.
//! Concurrent sync requests share a single in-flight future, so one
//! remote call serves every caller.
//!
//! [`OpenOrdersPoller`] turns reactive balance changes into debounced,
//! deduplicated open-order fetches, fanning the flat result back out
//! grouped by exchange.

pub mod batch;
pub mod engine;
pub mod poller;

pub use batch::fetch_orders_per_exchange;
pub use engine::{SyncEngine, SyncError};
pub use poller::{ExchangeOrdersResult, OpenOrdersPoller};
