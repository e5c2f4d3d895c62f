//! Periodic balance synchronization with request coalescing.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::api::{ApiError, BalanceSyncResult, BalancesApi};
use crate::crypto::CredentialCipher;
use crate::exchanges::ExchangeRepository;
use crate::store::{collections, Record, RecordStore};

/// Fixed period of the background sync timer
pub const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Fixed backoff before the single automatic retry
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Errors are shared verbatim with every coalesced caller, so the type
/// carries its sources as strings and stays `Clone`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("authentication rejected by the aggregation endpoint")]
    Auth,
    #[error("balance sync failed: {0}")]
    Api(String),
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized => SyncError::Auth,
            other => SyncError::Api(other.to_string()),
        }
    }
}

pub type SyncOutcome = Result<Option<BalanceSyncResult>, SyncError>;

type InFlight = Shared<BoxFuture<'static, SyncOutcome>>;

struct SessionState {
    user_id: Option<String>,
    timer: Option<JoinHandle<()>>,
}

struct EngineInner {
    repo: ExchangeRepository,
    api: Arc<dyn BalancesApi>,
    cipher: CredentialCipher,
    store: Arc<dyn RecordStore>,
    session: Mutex<SessionState>,
    /// At most one sync is in flight; concurrent callers await this
    /// same future instead of issuing a second remote call.
    in_flight: Mutex<Option<InFlight>>,
    retry_pending: AtomicBool,
    results_tx: watch::Sender<Option<BalanceSyncResult>>,
}

/// Background sync engine. Cloning hands out another handle to the
/// same session.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        api: Arc<dyn BalancesApi>,
        cipher: CredentialCipher,
    ) -> Self {
        let (results_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(EngineInner {
                repo: ExchangeRepository::new(Arc::clone(&store)),
                api,
                cipher,
                store,
                session: Mutex::new(SessionState {
                    user_id: None,
                    timer: None,
                }),
                in_flight: Mutex::new(None),
                retry_pending: AtomicBool::new(false),
                results_tx,
            }),
        }
    }

    /// Observe normalized sync results as they land.
    pub fn subscribe(&self) -> watch::Receiver<Option<BalanceSyncResult>> {
        self.inner.results_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.lock().unwrap().timer.is_some()
    }

    /// Begin the sync session: one immediate sync, then the periodic
    /// timer. No-op when already started.
    pub async fn start(&self, user_id: &str) {
        {
            let mut session = self.inner.session.lock().unwrap();
            if session.timer.is_some() {
                debug!("Sync session already running");
                return;
            }
            session.user_id = Some(user_id.to_string());

            let engine = self.clone();
            session.timer = Some(tokio::spawn(async move {
                let mut timer = interval(SYNC_INTERVAL);
                // the first tick completes immediately; the initial
                // sync is issued by start() itself
                timer.tick().await;
                loop {
                    timer.tick().await;
                    if let Err(e) = engine.sync_now(None).await {
                        warn!("Periodic balance sync failed: {}", e);
                    }
                }
            }));
        }

        info!(user_id, "Background sync started");
        if let Err(e) = self.sync_now(None).await {
            warn!("Initial balance sync failed: {}", e);
        }
    }

    /// Tear down the session. Idempotent.
    pub fn stop(&self) {
        let mut session = self.inner.session.lock().unwrap();
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
        session.user_id = None;
        drop(session);

        self.inner.in_flight.lock().unwrap().take();
        info!("Background sync stopped");
    }

    /// Sync balances for the effective user now.
    ///
    /// When a sync is already in flight the pending future is shared
    /// with the caller: every concurrent caller observes the identical
    /// outcome and exactly one remote call is issued. Returns Ok(None)
    /// when there is nothing to sync (no user, no decryptable
    /// credentials).
    pub async fn sync_now(&self, user_id: Option<&str>) -> SyncOutcome {
        let fut = {
            let mut slot = self.inner.in_flight.lock().unwrap();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let uid = user_id.map(str::to_string).or_else(|| {
                        self.inner.session.lock().unwrap().user_id.clone()
                    });
                    let uid = match uid {
                        Some(uid) => uid,
                        None => {
                            debug!("No user id available, skipping sync");
                            return Ok(None);
                        }
                    };

                    let inner = Arc::clone(&self.inner);
                    let fut: InFlight = async move {
                        let result = run_sync(&inner, &uid).await;

                        // Clear unconditionally so a stale reference can
                        // never block the next sync.
                        inner.in_flight.lock().unwrap().take();

                        if let Err(e) = &result {
                            if *e == SyncError::Auth {
                                warn!("Balance sync rejected with 401, not retrying");
                            } else {
                                schedule_retry(&inner);
                            }
                        }
                        result
                    }
                    .boxed()
                    .shared();

                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        fut.await
    }
}

/// One sync attempt: read credentials, decrypt, submit the batch,
/// persist and republish the result.
async fn run_sync(inner: &Arc<EngineInner>, user_id: &str) -> SyncOutcome {
    debug!(user_id, "Starting balance sync");

    let linked = inner.repo.active_for_user(user_id).await;
    if linked.is_empty() {
        debug!("No active linked exchanges");
        return Ok(None);
    }

    let mut batch = Vec::with_capacity(linked.len());
    for exchange in &linked {
        match exchange.decrypt(&inner.cipher) {
            Ok(creds) => batch.push(creds),
            Err(e) => {
                // one bad credential excludes that exchange only
                warn!(
                    exchange = %exchange.exchange_name,
                    "Skipping exchange, credential decryption failed: {}", e
                );
            }
        }
    }

    if batch.is_empty() {
        warn!("No credentials decrypted successfully, skipping sync");
        return Ok(None);
    }

    let result = inner.api.aggregate_balances(&batch).await?;

    let now = Utc::now();
    for entry in result.exchanges.iter().filter(|e| e.success) {
        if let Err(e) = inner.repo.mark_synced(&entry.exchange_id, now).await {
            warn!(exchange_id = %entry.exchange_id, "Failed to record sync time: {}", e);
        }
    }

    persist_snapshots(inner, &result).await;
    inner.results_tx.send_replace(Some(result.clone()));

    info!(
        exchanges = result.exchanges.len(),
        total_usd = %result.total_usd,
        "Balance sync completed"
    );
    Ok(Some(result))
}

/// Keep the latest snapshot per exchange plus an append-only history
/// entry. Persistence failures don't fail the sync; the result has
/// already been obtained and republished.
async fn persist_snapshots(inner: &Arc<EngineInner>, result: &BalanceSyncResult) {
    for entry in result.exchanges.iter().filter(|e| e.success) {
        match Record::from_serializable(entry) {
            Ok(mut record) => {
                record.id = entry.exchange_id.clone();
                if let Err(e) = inner
                    .store
                    .save(collections::BALANCE_SNAPSHOTS, record)
                    .await
                {
                    warn!(exchange_id = %entry.exchange_id, "Failed to save balance snapshot: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode balance snapshot: {}", e),
        }
    }

    match Record::from_serializable(result) {
        Ok(record) => {
            if let Err(e) = inner.store.save(collections::BALANCE_HISTORY, record).await {
                warn!("Failed to append balance history: {}", e);
            }
        }
        Err(e) => warn!("Failed to encode balance history entry: {}", e),
    }
}

/// Schedule the single automatic retry after a transient failure. The
/// original caller still receives the error from the current attempt.
fn schedule_retry(inner: &Arc<EngineInner>) {
    if inner.retry_pending.swap(true, Ordering::SeqCst) {
        debug!("Retry already scheduled");
        return;
    }

    warn!(
        "Balance sync failed, retrying in {}s",
        RETRY_DELAY.as_secs()
    );
    let engine = SyncEngine {
        inner: Arc::clone(inner),
    };
    tokio::spawn(async move {
        tokio::time::sleep(RETRY_DELAY).await;
        engine.inner.retry_pending.store(false, Ordering::SeqCst);
        if let Err(e) = engine.sync_now(None).await {
            warn!("Retry sync failed: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ExchangeBalances;
    use crate::exchanges::test_support::linked_exchange;
    use crate::store::SqliteRecordStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Scripted aggregation endpoint: pops one response per call and
    /// counts calls and batch sizes.
    struct ScriptedBalancesApi {
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        responses: Mutex<VecDeque<Result<BalanceSyncResult, ApiError>>>,
        delay: Duration,
    }

    impl ScriptedBalancesApi {
        fn new(responses: Vec<Result<BalanceSyncResult, ApiError>>) -> Arc<Self> {
            Self::with_delay(responses, Duration::ZERO)
        }

        fn with_delay(
            responses: Vec<Result<BalanceSyncResult, ApiError>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
                delay,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalancesApi for ScriptedBalancesApi {
        async fn aggregate_balances(
            &self,
            batch: &[crate::exchanges::ExchangeCredentials],
        ) -> Result<BalanceSyncResult, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(batch.len());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Transport("script exhausted".to_string())))
        }
    }

    fn sample_result(exchange_ids: &[&str]) -> BalanceSyncResult {
        BalanceSyncResult {
            exchanges: exchange_ids
                .iter()
                .map(|id| ExchangeBalances {
                    exchange_id: id.to_string(),
                    exchange: "binance".to_string(),
                    success: true,
                    error: None,
                    balances: Default::default(),
                    total_usd: Default::default(),
                })
                .collect(),
            total_usd: Default::default(),
            timestamp: Utc::now(),
        }
    }

    struct Fixture {
        engine: SyncEngine,
        api: Arc<ScriptedBalancesApi>,
        repo: ExchangeRepository,
        cipher: CredentialCipher,
    }

    fn fixture(api: Arc<ScriptedBalancesApi>) -> Fixture {
        let store: Arc<dyn RecordStore> =
            Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let cipher = CredentialCipher::new("test-pass").unwrap();
        let repo = ExchangeRepository::new(Arc::clone(&store));
        let engine = SyncEngine::new(store, api.clone(), cipher.clone());
        Fixture {
            engine,
            api,
            repo,
            cipher,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_call() {
        let api = ScriptedBalancesApi::with_delay(
            vec![Ok(sample_result(&["ex-1"]))],
            Duration::from_millis(100),
        );
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        let (a, b, c) = tokio::join!(
            f.engine.sync_now(Some("user-1")),
            f.engine.sync_now(Some("user-1")),
            f.engine.sync_now(Some("user-1")),
        );

        assert_eq!(f.api.call_count(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(a.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_sync_after_settle_issues_new_call() {
        let api = ScriptedBalancesApi::new(vec![
            Ok(sample_result(&["ex-1"])),
            Ok(sample_result(&["ex-1"])),
        ]);
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        f.engine.sync_now(Some("user-1")).await.unwrap();
        f.engine.sync_now(Some("user-1")).await.unwrap();
        assert_eq!(f.api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_no_user_id_skips_without_syncing() {
        let api = ScriptedBalancesApi::new(vec![]);
        let f = fixture(api);

        assert_eq!(f.engine.sync_now(None).await, Ok(None));
        assert_eq!(f.api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_undecryptable_credential_is_excluded_not_fatal() {
        let api = ScriptedBalancesApi::new(vec![Ok(sample_result(&["ex-1"]))]);
        let f = fixture(api);

        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();
        let mut broken = linked_exchange("ex-2", "user-1", "kraken", &f.cipher);
        broken.api_secret_encrypted = "garbage".to_string();
        f.repo.upsert(broken).await.unwrap();

        let result = f.engine.sync_now(Some("user-1")).await.unwrap();
        assert!(result.is_some());
        assert_eq!(f.api.call_count(), 1);
        assert_eq!(*f.api.batch_sizes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_zero_decryptable_credentials_returns_none() {
        let api = ScriptedBalancesApi::new(vec![]);
        let f = fixture(api);

        let mut broken = linked_exchange("ex-1", "user-1", "binance", &f.cipher);
        broken.api_key_encrypted = "garbage".to_string();
        f.repo.upsert(broken).await.unwrap();

        assert_eq!(f.engine.sync_now(Some("user-1")).await, Ok(None));
        assert_eq!(f.api.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_once_after_backoff() {
        let api = ScriptedBalancesApi::new(vec![
            Err(ApiError::Transport("connection reset".to_string())),
            Ok(sample_result(&["ex-1"])),
        ]);
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        // start() performs the immediate sync, which fails and
        // schedules the retry
        f.engine.start("user-1").await;
        assert_eq!(f.api.call_count(), 1);

        tokio::time::sleep(RETRY_DELAY + Duration::from_secs(1)).await;
        assert_eq!(f.api.call_count(), 2);

        f.engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_never_retries() {
        let api = ScriptedBalancesApi::new(vec![Err(ApiError::Unauthorized)]);
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        f.engine.start("user-1").await;
        assert_eq!(f.api.call_count(), 1);

        tokio::time::sleep(RETRY_DELAY * 3).await;
        assert_eq!(f.api.call_count(), 1);

        f.engine.stop();
    }

    #[tokio::test]
    async fn test_caller_receives_propagated_error() {
        let api = ScriptedBalancesApi::new(vec![Err(ApiError::Unauthorized)]);
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        assert_eq!(
            f.engine.sync_now(Some("user-1")).await,
            Err(SyncError::Auth)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_tears_down() {
        let api = ScriptedBalancesApi::new(vec![
            Ok(sample_result(&["ex-1"])),
            Ok(sample_result(&["ex-1"])),
        ]);
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        f.engine.start("user-1").await;
        f.engine.start("user-1").await;
        assert!(f.engine.is_running());
        assert_eq!(f.api.call_count(), 1);

        f.engine.stop();
        f.engine.stop();
        assert!(!f.engine.is_running());

        // timer is gone: no further calls even past the interval
        tokio::time::sleep(SYNC_INTERVAL * 2).await;
        assert_eq!(f.api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_result_republished_and_snapshots_persisted() {
        let api = ScriptedBalancesApi::new(vec![Ok(sample_result(&["ex-1"]))]);
        let f = fixture(api);
        f.repo
            .upsert(linked_exchange("ex-1", "user-1", "binance", &f.cipher))
            .await
            .unwrap();

        let rx = f.engine.subscribe();
        let result = f.engine.sync_now(Some("user-1")).await.unwrap().unwrap();

        assert_eq!(rx.borrow().as_ref(), Some(&result));
        assert!(f.repo.get("ex-1").await.unwrap().last_sync_at.is_some());
    }
}
