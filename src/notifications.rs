//! Progress listener interface and fan-out registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{EngineError, SyncError, SyncResult, WalletError};
use crate::types::{
    AddressDiscoveryProgress, CFiltersFetchProgress, DebugTimes, HeadersFetchProgress,
    HeadersRescanProgress, WalletId,
};

/// Observer of sync and rescan progress.
///
/// Every method has a no-op default so listeners implement only the events
/// they care about. Methods are invoked synchronously on session tasks and
/// must not block; hand work off to a channel or task if it is not trivial.
pub trait SyncProgressListener: Send + Sync {
    /// A sync session started. `is_restart` distinguishes a restart
    /// requested through [`SyncSession::restart_sync`](crate::SyncSession::restart_sync)
    /// from a cold start.
    fn on_sync_started(&self, _is_restart: bool) {}

    /// The connected peer count changed.
    fn on_peer_count_changed(&self, _peer_count: i32) {}

    /// The CFilter fetch stage advanced.
    fn on_cfilters_fetch_progress(&self, _report: &CFiltersFetchProgress) {}

    /// The header fetch stage advanced.
    fn on_headers_fetch_progress(&self, _report: &HeadersFetchProgress) {}

    /// The address discovery stage advanced.
    fn on_address_discovery_progress(&self, _report: &AddressDiscoveryProgress) {}

    /// The in-sync headers rescan stage advanced.
    fn on_headers_rescan_progress(&self, _report: &HeadersRescanProgress) {}

    /// Every managed wallet reached agreement with the chain tip.
    fn on_sync_completed(&self) {}

    /// The session was canceled. `will_restart` is true when the
    /// cancellation is part of a requested restart.
    fn on_sync_canceled(&self, _will_restart: bool) {}

    /// The engine failed; the session has already torn down.
    fn on_sync_ended_with_error(&self, _error: &EngineError) {}

    /// Raw timing numbers accompanying each progress recomputation.
    fn on_debug_times(&self, _times: &DebugTimes) {}

    /// A standalone blocks rescan started for a wallet.
    fn on_blocks_rescan_started(&self, _wallet_id: WalletId) {}

    /// A standalone blocks rescan advanced.
    fn on_blocks_rescan_progress(&self, _report: &HeadersRescanProgress) {}

    /// A standalone blocks rescan ended. `error` is `None` for both
    /// successful completion and user cancellation.
    fn on_blocks_rescan_ended(&self, _wallet_id: WalletId, _error: Option<&WalletError>) {}
}

/// Thread-safe map of named progress listeners.
///
/// Publishing iterates a snapshot taken under the read lock and released
/// before any callback runs, so a listener may re-enter the registry (for
/// example to unregister itself) without deadlocking.
#[derive(Default)]
pub struct NotificationRegistry {
    listeners: RwLock<HashMap<String, Arc<dyn SyncProgressListener>>>,
}

impl NotificationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under a unique key.
    pub async fn add(
        &self,
        listener: Arc<dyn SyncProgressListener>,
        key: &str,
    ) -> SyncResult<()> {
        let mut listeners = self.listeners.write().await;
        if listeners.contains_key(key) {
            return Err(SyncError::ListenerAlreadyExists(key.to_string()));
        }
        listeners.insert(key.to_string(), listener);
        Ok(())
    }

    /// Remove a listener. No-op when the key is not registered.
    pub async fn remove(&self, key: &str) {
        self.listeners.write().await.remove(key);
    }

    /// Whether a listener is registered under the key.
    pub async fn contains(&self, key: &str) -> bool {
        self.listeners.read().await.contains_key(key)
    }

    /// Look up a single listener by key.
    pub async fn get(&self, key: &str) -> Option<Arc<dyn SyncProgressListener>> {
        self.listeners.read().await.get(key).cloned()
    }

    /// Snapshot the current listener set for publishing.
    pub async fn snapshot(&self) -> Vec<Arc<dyn SyncProgressListener>> {
        self.listeners.read().await.values().cloned().collect()
    }
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistry").finish_non_exhaustive()
    }
}
