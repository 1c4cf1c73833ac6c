//! Shared session state.
//!
//! `SyncData` is the long-lived state guarded by the session lock;
//! `ActiveSyncData` is the per-run slice created at start and discarded at
//! teardown. Reading or writing any field here requires holding the
//! session's `RwLock`; wallet flags are written only by the dispatcher
//! task but read from arbitrary tasks, so reads go through the lock too.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::WalletBackend;
use crate::inactivity::InactivityAccountant;
use crate::types::{
    AddressDiscoveryProgress, BlockInfo, CFiltersFetchProgress, HeadersFetchProgress,
    HeadersRescanProgress, SyncStage, WalletId,
};

/// A managed wallet plus its session-scoped sync flags.
pub(crate) struct WalletState {
    pub backend: Arc<dyn WalletBackend>,
    /// Set while the wallet's tip is behind the fetched header height.
    pub waiting_for_headers: bool,
    pub syncing: bool,
    pub synced: bool,
}

impl WalletState {
    pub fn new(backend: Arc<dyn WalletBackend>) -> Self {
        Self {
            backend,
            waiting_for_headers: true,
            syncing: false,
            synced: false,
        }
    }
}

/// Snapshot of an in-flight standalone rescan.
pub(crate) struct StandaloneRescan {
    pub wallet_id: WalletId,
    pub current_height: i32,
    pub target_height: i32,
    pub start_timestamp: i64,
}

/// Long-lived session state.
pub(crate) struct SyncData {
    pub syncing: bool,
    pub synced: bool,
    pub connected_peers: i32,
    /// Set by `restart_sync`; consumed by the next `start`.
    pub restart_requested: bool,
    /// Gate for the human-oriented progress log lines.
    pub show_logs: bool,

    /// Cancels the engine run. `Some` iff a dispatcher task is active.
    pub cancel: Option<CancellationToken>,
    /// Tripped by the dispatcher after full teardown; `cancel_sync` blocks
    /// on it.
    pub terminated: Option<CancellationToken>,

    pub rescanning: bool,
    pub rescan_cancel: Option<CancellationToken>,
    pub rescan_terminated: Option<CancellationToken>,
    pub standalone_rescan: Option<StandaloneRescan>,

    pub wallets: HashMap<WalletId, WalletState>,
    pub active: Option<ActiveSyncData>,
}

impl SyncData {
    pub fn new(wallets: HashMap<WalletId, Arc<dyn WalletBackend>>) -> Self {
        Self {
            syncing: false,
            synced: false,
            connected_peers: 0,
            restart_requested: false,
            show_logs: false,
            cancel: None,
            terminated: None,
            rescanning: false,
            rescan_cancel: None,
            rescan_terminated: None,
            standalone_rescan: None,
            wallets: wallets.into_iter().map(|(id, backend)| (id, WalletState::new(backend))).collect(),
            active: None,
        }
    }

    /// Best block across all managed wallets.
    pub fn best_block(&self) -> Option<BlockInfo> {
        self.wallets
            .values()
            .map(|w| BlockInfo {
                height: w.backend.best_block_height(),
                timestamp: w.backend.best_block_timestamp(),
            })
            .max_by_key(|info| info.height)
    }

    /// Lowest best block across all managed wallets; header fetching must
    /// start from here so every wallet catches up.
    pub fn lowest_block(&self) -> Option<BlockInfo> {
        self.wallets
            .values()
            .map(|w| BlockInfo {
                height: w.backend.best_block_height(),
                timestamp: w.backend.best_block_timestamp(),
            })
            .min_by_key(|info| info.height)
    }

    pub fn all_wallets_synced(&self) -> bool {
        !self.wallets.is_empty() && self.wallets.values().all(|w| w.synced)
    }
}

/// Per-run state, created at `start` and discarded at teardown.
pub(crate) struct ActiveSyncData {
    pub stage: SyncStage,

    pub cfilters: CFiltersFetchProgress,
    pub headers: HeadersFetchProgress,
    pub discovery: AddressDiscoveryProgress,
    pub rescan: HeadersRescanProgress,

    /// Height of the first fetched filter batch (-1 until known).
    pub cfilters_start_height: i32,
    /// Lowest wallet height when header fetching started (-1 outside the
    /// stage).
    pub headers_start_height: i32,

    pub inactivity: InactivityAccountant,

    /// Whether the dispatcher should be running the 1 Hz discovery timer.
    pub discovery_armed: bool,
}

impl ActiveSyncData {
    pub fn new() -> Self {
        Self {
            stage: SyncStage::Invalid,
            cfilters: CFiltersFetchProgress::default(),
            headers: HeadersFetchProgress::default(),
            discovery: AddressDiscoveryProgress::default(),
            rescan: HeadersRescanProgress::default(),
            cfilters_start_height: -1,
            headers_start_height: -1,
            inactivity: InactivityAccountant::default(),
            discovery_armed: false,
        }
    }
}
