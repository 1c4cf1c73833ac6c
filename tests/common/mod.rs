//! Shared mocks and helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use spv_sync::{
    AddressDiscoveryProgress, CFiltersFetchProgress, ChainEngine, ChainEvent, DebugTimes,
    EngineError, EngineResult, HeadersFetchProgress, HeadersRescanProgress, SyncConfig,
    SyncProgressListener, SyncSession, WalletBackend, WalletError, WalletId, WalletResult,
};

/// Engine mock: hands the test a clone of the event sender so the test can
/// script the run, then blocks until canceled or told to finish.
pub struct MockChainEngine {
    sender: Mutex<Option<mpsc::UnboundedSender<ChainEvent>>>,
    peers_seen: Mutex<Vec<String>>,
    run_count: AtomicUsize,
    finish: tokio::sync::Notify,
    finish_result: Mutex<Option<EngineResult<()>>>,
}

impl MockChainEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sender: Mutex::new(None),
            peers_seen: Mutex::new(Vec::new()),
            run_count: AtomicUsize::new(0),
            finish: tokio::sync::Notify::new(),
            finish_result: Mutex::new(None),
        })
    }

    /// Number of times `run` was entered.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Persistent peers passed to the most recent run.
    pub fn peers_seen(&self) -> Vec<String> {
        self.peers_seen.lock().unwrap().clone()
    }

    /// Emit an event into the active run. Panics if no run is active.
    pub fn emit(&self, event: ChainEvent) {
        let sender = self.sender.lock().unwrap();
        sender.as_ref().expect("engine not running").send(event).expect("dispatcher gone");
    }

    /// Make the active run return the given result.
    pub fn finish_with(&self, result: EngineResult<()>) {
        *self.finish_result.lock().unwrap() = Some(result);
        self.finish.notify_one();
    }

    /// Wait until a run is active (sender captured).
    pub async fn wait_until_running(&self) {
        assert!(wait_until(|| self.sender.lock().unwrap().is_some()).await, "engine never ran");
    }

    /// Clone of the active run's event sender, for tests that probe
    /// delivery after teardown.
    pub fn sender_snapshot(&self) -> Option<mpsc::UnboundedSender<ChainEvent>> {
        self.sender.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainEngine for MockChainEngine {
    async fn run(
        &self,
        persistent_peers: Vec<String>,
        events: mpsc::UnboundedSender<ChainEvent>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        *self.peers_seen.lock().unwrap() = persistent_peers;
        *self.sender.lock().unwrap() = Some(events);
        self.run_count.fetch_add(1, Ordering::SeqCst);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Canceled),
            _ = self.finish.notified() => {
                self.finish_result.lock().unwrap().take().unwrap_or(Ok(()))
            }
        };
        self.sender.lock().unwrap().take();
        result
    }
}

/// Wallet mock with scriptable heights and rescan behavior.
pub struct MockWalletBackend {
    pub best_height: AtomicI32,
    pub best_timestamp: AtomicI64,
    pub network_backend: AtomicBool,
    pub mixer_active: AtomicBool,
    pub mixer_stops: AtomicUsize,
    pub index_calls: AtomicUsize,
    pub reindex_calls: AtomicUsize,
    pub checkpoints: Mutex<Vec<i32>>,
    /// Heights the next rescan drive reports, in order.
    pub rescan_script: Mutex<Vec<i32>>,
    /// Delay between scripted rescan ticks.
    pub rescan_tick_delay: Mutex<Duration>,
    /// Error the rescan drive returns after its script runs out.
    pub rescan_error: Mutex<Option<WalletError>>,
}

impl MockWalletBackend {
    pub fn new(best_height: i32, best_timestamp: i64) -> Arc<Self> {
        Arc::new(Self {
            best_height: AtomicI32::new(best_height),
            best_timestamp: AtomicI64::new(best_timestamp),
            network_backend: AtomicBool::new(true),
            mixer_active: AtomicBool::new(false),
            mixer_stops: AtomicUsize::new(0),
            index_calls: AtomicUsize::new(0),
            reindex_calls: AtomicUsize::new(0),
            checkpoints: Mutex::new(Vec::new()),
            rescan_script: Mutex::new(Vec::new()),
            rescan_tick_delay: Mutex::new(Duration::from_millis(5)),
            rescan_error: Mutex::new(None),
        })
    }

    pub fn set_rescan_script(&self, heights: Vec<i32>, tick_delay: Duration) {
        *self.rescan_script.lock().unwrap() = heights;
        *self.rescan_tick_delay.lock().unwrap() = tick_delay;
    }
}

#[async_trait]
impl WalletBackend for MockWalletBackend {
    fn best_block_height(&self) -> i32 {
        self.best_height.load(Ordering::SeqCst)
    }

    fn best_block_timestamp(&self) -> i64 {
        self.best_timestamp.load(Ordering::SeqCst)
    }

    fn has_network_backend(&self) -> bool {
        self.network_backend.load(Ordering::SeqCst)
    }

    fn is_account_mixer_active(&self) -> bool {
        self.mixer_active.load(Ordering::SeqCst)
    }

    async fn stop_account_mixer(&self) -> WalletResult<()> {
        self.mixer_stops.fetch_add(1, Ordering::SeqCst);
        self.mixer_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rescan_from_height(
        &self,
        _from_height: i32,
        progress: mpsc::UnboundedSender<i32>,
        cancel: CancellationToken,
    ) -> WalletResult<()> {
        let script = self.rescan_script.lock().unwrap().clone();
        let delay = *self.rescan_tick_delay.lock().unwrap();
        for height in script {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let _ = progress.send(height);
            tokio::time::sleep(delay).await;
        }
        if cancel.is_cancelled() {
            return Ok(());
        }
        match self.rescan_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn save_rescan_checkpoint(&self, height: i32) -> WalletResult<()> {
        self.checkpoints.lock().unwrap().push(height);
        Ok(())
    }

    async fn index_transactions(&self) -> WalletResult<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reindex_transactions(&self) -> WalletResult<()> {
        self.reindex_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything a listener can observe, in arrival order.
#[derive(Debug, Clone)]
pub enum Observed {
    Started { is_restart: bool },
    PeerCount(i32),
    CFilters(CFiltersFetchProgress),
    Headers(HeadersFetchProgress),
    Discovery(AddressDiscoveryProgress),
    StageRescan(HeadersRescanProgress),
    Completed,
    Canceled { will_restart: bool },
    EndedWithError(EngineError),
    Debug(DebugTimes),
    BlocksRescanStarted(WalletId),
    BlocksRescanProgress(HeadersRescanProgress),
    BlocksRescanEnded { wallet_id: WalletId, error: Option<WalletError> },
}

/// Listener that records every notification it receives.
#[derive(Default)]
pub struct CollectingListener {
    observed: Mutex<Vec<Observed>>,
}

impl CollectingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Observed) {
        self.observed.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<Observed> {
        self.observed.lock().unwrap().clone()
    }

    /// Wait until the recorded events satisfy the predicate (5s timeout).
    pub async fn wait_for<F>(&self, predicate: F)
    where
        F: Fn(&[Observed]) -> bool,
    {
        let satisfied = wait_until(|| predicate(&self.observed.lock().unwrap())).await;
        assert!(satisfied, "timed out waiting for listener state: {:?}", self.snapshot());
    }
}

impl SyncProgressListener for CollectingListener {
    fn on_sync_started(&self, is_restart: bool) {
        self.push(Observed::Started {
            is_restart,
        });
    }
    fn on_peer_count_changed(&self, peer_count: i32) {
        self.push(Observed::PeerCount(peer_count));
    }
    fn on_cfilters_fetch_progress(&self, report: &CFiltersFetchProgress) {
        self.push(Observed::CFilters(report.clone()));
    }
    fn on_headers_fetch_progress(&self, report: &HeadersFetchProgress) {
        self.push(Observed::Headers(report.clone()));
    }
    fn on_address_discovery_progress(&self, report: &AddressDiscoveryProgress) {
        self.push(Observed::Discovery(report.clone()));
    }
    fn on_headers_rescan_progress(&self, report: &HeadersRescanProgress) {
        self.push(Observed::StageRescan(report.clone()));
    }
    fn on_sync_completed(&self) {
        self.push(Observed::Completed);
    }
    fn on_sync_canceled(&self, will_restart: bool) {
        self.push(Observed::Canceled {
            will_restart,
        });
    }
    fn on_sync_ended_with_error(&self, error: &EngineError) {
        self.push(Observed::EndedWithError(error.clone()));
    }
    fn on_debug_times(&self, times: &DebugTimes) {
        self.push(Observed::Debug(*times));
    }
    fn on_blocks_rescan_started(&self, wallet_id: WalletId) {
        self.push(Observed::BlocksRescanStarted(wallet_id));
    }
    fn on_blocks_rescan_progress(&self, report: &HeadersRescanProgress) {
        self.push(Observed::BlocksRescanProgress(report.clone()));
    }
    fn on_blocks_rescan_ended(&self, wallet_id: WalletId, error: Option<&WalletError>) {
        self.push(Observed::BlocksRescanEnded {
            wallet_id,
            error: error.cloned(),
        });
    }
}

/// Poll a condition every 10ms for up to 5 seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A test config with a 1-second block interval so header-count estimates
/// map directly onto seconds-behind.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        target_secs_per_block: 1,
        ..SyncConfig::default()
    }
}

/// Build a session over mock wallets with the given ids and heights.
pub fn session_with_wallets(
    config: SyncConfig,
    wallets: &[(WalletId, Arc<MockWalletBackend>)],
) -> (SyncSession, Arc<MockChainEngine>) {
    let engine = MockChainEngine::new();
    let mut map: HashMap<WalletId, Arc<dyn WalletBackend>> = HashMap::new();
    for (id, backend) in wallets {
        let backend: Arc<dyn WalletBackend> = backend.clone();
        map.insert(*id, backend);
    }
    let session = SyncSession::new(config, engine.clone(), map).expect("valid config");
    (session, engine)
}

/// Current unix time in seconds, for building event timestamps.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}
