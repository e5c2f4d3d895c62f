//! Reactive open-orders polling.
//!
//! Balance updates arrive far more often than they actually change, so
//! the poller fingerprints the balance state first and only a real
//! change arms the (500ms) debounce timer. When it fires, one flat
//! fetch covers every linked exchange and the results fan back out
//! grouped per exchange, one entry each, so "zero open orders" and
//! "fetch failed" stay distinguishable.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::api::{BalanceSyncResult, OpenOrder, OrdersApi};
use crate::exchanges::{ExchangeRepository, LinkedExchange};

/// Quiet period a burst of balance changes must observe before one
/// batched fetch is issued
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Per-exchange slice of one batched fetch. Present for every linked
/// exchange regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeOrdersResult {
    pub exchange_id: String,
    pub exchange_name: String,
    pub orders: Vec<OpenOrder>,
    pub orders_count: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExchangeOrdersResult {
    pub(crate) fn fetched(exchange: &LinkedExchange, orders: Vec<OpenOrder>) -> Self {
        Self {
            exchange_id: exchange.id.clone(),
            exchange_name: exchange.exchange_name.clone(),
            orders_count: orders.len(),
            orders,
            success: true,
            error: None,
        }
    }

    pub(crate) fn failed(exchange: &LinkedExchange, error: String) -> Self {
        Self {
            exchange_id: exchange.id.clone(),
            exchange_name: exchange.exchange_name.clone(),
            orders: Vec::new(),
            orders_count: 0,
            success: false,
            error: Some(error),
        }
    }
}

/// Order-insensitive fingerprint of the balance state: which exchanges
/// hold how many assets. Cheap enough to run on every update, precise
/// enough to catch any change worth refetching orders for.
pub(crate) fn balance_content_hash(result: &BalanceSyncResult) -> String {
    let mut pairs: Vec<(&str, usize)> = result
        .exchanges
        .iter()
        .map(|e| (e.exchange_id.as_str(), e.balances.len()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for (exchange_id, token_count) in pairs {
        hasher.update(exchange_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(token_count as u64).to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

struct PollerInner {
    repo: ExchangeRepository,
    api: Arc<dyn OrdersApi>,
    user_id: String,
    last_hash: Mutex<Option<String>>,
    debounce: Mutex<Option<JoinHandle<()>>>,
    /// Guards against overlapping batched fetches; a second request is
    /// dropped, not queued.
    fetching: AtomicBool,
    /// Cleared on shutdown; late completions check it before touching
    /// shared state, since the network call itself is not cancelled.
    alive: AtomicBool,
    results_tx: watch::Sender<Option<Vec<ExchangeOrdersResult>>>,
}

#[derive(Clone)]
pub struct OpenOrdersPoller {
    inner: Arc<PollerInner>,
}

impl OpenOrdersPoller {
    pub fn new(repo: ExchangeRepository, api: Arc<dyn OrdersApi>, user_id: &str) -> Self {
        let (results_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(PollerInner {
                repo,
                api,
                user_id: user_id.to_string(),
                last_hash: Mutex::new(None),
                debounce: Mutex::new(None),
                fetching: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                results_tx,
            }),
        }
    }

    /// Observe partitioned fetch results as they land.
    pub fn subscribe(&self) -> watch::Receiver<Option<Vec<ExchangeOrdersResult>>> {
        self.inner.results_tx.subscribe()
    }

    /// Reactive trigger: re-fingerprint the balance state, and on a
    /// real change (re)arm the debounce timer. Re-renders that change
    /// nothing cost nothing.
    pub fn balances_changed(&self, snapshot: &BalanceSyncResult) {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }

        let hash = balance_content_hash(snapshot);
        {
            let mut last = self.inner.last_hash.lock().unwrap();
            if last.as_deref() == Some(hash.as_str()) {
                debug!("Balance state unchanged, skipping order refresh");
                return;
            }
            *last = Some(hash);
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            sleep(DEBOUNCE_WINDOW).await;
            if !inner.alive.load(Ordering::SeqCst) {
                return;
            }
            fetch_batch(&inner).await;
        });

        let mut debounce = self.inner.debounce.lock().unwrap();
        if let Some(previous) = debounce.replace(task) {
            previous.abort();
        }
    }

    /// Manual refresh: bypasses both the content-hash short-circuit and
    /// the debounce. A user-initiated refresh always hits the network,
    /// unless a fetch is already running (then it is dropped).
    pub async fn refresh_now(&self) -> Option<Vec<ExchangeOrdersResult>> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return None;
        }
        fetch_batch(&self.inner).await
    }

    /// Tear down: no further fetches are started and pending debounce
    /// work is cancelled.
    pub fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.debounce.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// One batched fetch. Returns None when dropped by the concurrency
/// guard.
async fn fetch_batch(inner: &Arc<PollerInner>) -> Option<Vec<ExchangeOrdersResult>> {
    if inner
        .fetching
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("Order fetch already in progress, dropping request");
        return None;
    }

    let results = run_fetch(inner).await;
    inner.fetching.store(false, Ordering::SeqCst);

    if inner.alive.load(Ordering::SeqCst) {
        inner.results_tx.send_replace(Some(results.clone()));
    }
    Some(results)
}

async fn run_fetch(inner: &Arc<PollerInner>) -> Vec<ExchangeOrdersResult> {
    let linked = inner.repo.list_for_user(&inner.user_id).await;

    match inner.api.fetch_open_orders(&inner.user_id).await {
        Ok(orders) => {
            debug!(count = orders.len(), "Partitioning open orders by exchange");
            linked
                .iter()
                .map(|exchange| {
                    let mine: Vec<OpenOrder> = orders
                        .iter()
                        .filter(|o| {
                            o.belongs_to(&exchange.id) || o.exchange == exchange.exchange_type
                        })
                        .cloned()
                        .collect();
                    ExchangeOrdersResult::fetched(exchange, mine)
                })
                .collect()
        }
        Err(e) => {
            warn!("Open orders fetch failed: {}", e);
            linked
                .iter()
                .map(|exchange| ExchangeOrdersResult::failed(exchange, e.to_string()))
                .collect()
        }
    }
}
