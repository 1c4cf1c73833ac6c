//! The sync session: lifecycle, queries, and listener management.
//!
//! This module contains:
//! - Constructor (`new`)
//! - Session lifecycle (`start`, `cancel_sync`, `restart_sync`)
//! - State queries (`is_syncing`, `current_stage`, ...)
//! - Listener registration and last-progress replay
//! - Inactivity reporting

mod dispatcher;
mod rescan;
mod stages;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::engine::{ChainEngine, WalletBackend};
use crate::error::{SyncError, SyncResult};
use crate::notifications::{NotificationRegistry, SyncProgressListener};
use crate::types::{BlockInfo, GeneralSyncProgress, SyncStage, WalletId};

use state::{ActiveSyncData, SyncData};

/// Shared core reached by the session handle, the dispatcher task, and any
/// rescan task.
pub(crate) struct SessionCore {
    pub(crate) config: SyncConfig,
    pub(crate) engine: Arc<dyn ChainEngine>,
    pub(crate) data: RwLock<SyncData>,
    pub(crate) registry: NotificationRegistry,
}

impl SessionCore {
    /// Invoke `f` on a snapshot of the registered listeners. Never called
    /// while holding the session lock.
    pub(crate) async fn notify_listeners<F>(&self, f: F)
    where
        F: Fn(&dyn SyncProgressListener),
    {
        for listener in self.registry.snapshot().await {
            f(listener.as_ref());
        }
    }
}

/// Coordinates the staged sync pipeline for a set of wallets.
///
/// One `SyncSession` owns all sync state for its wallet set: the
/// long-lived flags (syncing/synced/peer count), the per-run stage
/// reports, the listener registry, and any standalone rescan. Handles are
/// cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct SyncSession {
    core: Arc<SessionCore>,
}

impl SyncSession {
    /// Create a session over the given engine and managed wallets.
    pub fn new(
        config: SyncConfig,
        engine: Arc<dyn ChainEngine>,
        wallets: HashMap<WalletId, Arc<dyn WalletBackend>>,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(SessionCore {
                config,
                engine,
                data: RwLock::new(SyncData::new(wallets)),
                registry: NotificationRegistry::new(),
            }),
        })
    }

    /// Start a sync run.
    ///
    /// Fails with [`SyncError::AlreadySyncing`] when a run is active or the
    /// session is already synced, and with [`SyncError::InvalidState`] when
    /// a standalone rescan is in flight. On success exactly one dispatcher
    /// task is spawned and listeners are told `sync_started` before any
    /// stage notification.
    pub async fn start(&self) -> SyncResult<()> {
        let peers = self.core.config.resolve_persistent_peers()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let terminated = CancellationToken::new();

        let is_restart = {
            let mut data = self.core.data.write().await;
            if data.rescanning {
                return Err(SyncError::InvalidState("rescan in progress".to_string()));
            }
            if data.syncing || data.synced {
                return Err(SyncError::AlreadySyncing);
            }

            data.active = Some(ActiveSyncData::new());
            for wallet in data.wallets.values_mut() {
                wallet.waiting_for_headers = true;
                wallet.syncing = true;
            }
            data.syncing = true;
            data.cancel = Some(cancel.clone());
            data.terminated = Some(terminated.clone());

            let is_restart = data.restart_requested;
            data.restart_requested = false;
            is_restart
        };

        tracing::info!(restart = is_restart, "Starting sync");
        self.core.notify_listeners(|l| l.on_sync_started(is_restart)).await;

        tokio::spawn(dispatcher::run_dispatcher(
            self.core.clone(),
            events_tx,
            events_rx,
            peers,
            cancel,
            terminated,
        ));
        Ok(())
    }

    /// Cancel the active sync run, if any.
    ///
    /// Idempotent, and synchronous from the caller's perspective: any
    /// running account mixers are stopped first, then the engine is
    /// canceled, and the call returns only after the dispatcher task has
    /// observed cancellation and fully unwound. No stage notification is
    /// delivered after this returns.
    pub async fn cancel_sync(&self) {
        let (cancel, terminated, mixing) = {
            let data = self.core.data.read().await;
            let mixing: Vec<(WalletId, Arc<dyn WalletBackend>)> = data
                .wallets
                .iter()
                .filter(|(_, w)| w.backend.is_account_mixer_active())
                .map(|(id, w)| (*id, w.backend.clone()))
                .collect();
            (data.cancel.clone(), data.terminated.clone(), mixing)
        };

        let Some(cancel) = cancel else {
            return;
        };

        tracing::info!("Canceling sync. May take a while for sync to fully cancel.");
        for (wallet_id, backend) in mixing {
            tracing::info!("[{}] Stopping account mixer", wallet_id);
            if let Err(err) = backend.stop_account_mixer().await {
                tracing::error!("[{}] Error stopping account mixer: {}", wallet_id, err);
            }
        }

        cancel.cancel();
        if let Some(terminated) = terminated {
            terminated.cancelled().await;
        }
        tracing::info!("Sync fully canceled.");
    }

    /// Cancel any active run and start again. The next `sync_started`
    /// notification carries `is_restart == true` exactly once.
    pub async fn restart_sync(&self) -> SyncResult<()> {
        self.core.data.write().await.restart_requested = true;
        self.cancel_sync().await;
        self.start().await
    }

    /// Whether a sync run is active.
    pub async fn is_syncing(&self) -> bool {
        self.core.data.read().await.syncing
    }

    /// Whether every managed wallet is in agreement with the chain tip.
    pub async fn is_synced(&self) -> bool {
        self.core.data.read().await.synced
    }

    /// Whether the session is connected to the network (syncing or synced).
    pub async fn is_connected_to_network(&self) -> bool {
        let data = self.core.data.read().await;
        data.syncing || data.synced
    }

    /// The pipeline stage the active run is in, or
    /// [`SyncStage::Invalid`] when no run is active.
    pub async fn current_stage(&self) -> SyncStage {
        let data = self.core.data.read().await;
        if data.syncing {
            if let Some(active) = &data.active {
                return active.stage;
            }
        }
        SyncStage::Invalid
    }

    /// Number of currently connected peers.
    pub async fn connected_peer_count(&self) -> i32 {
        self.core.data.read().await.connected_peers
    }

    /// The current stage's overall progress pair, when a run is active.
    pub async fn general_progress(&self) -> Option<GeneralSyncProgress> {
        let data = self.core.data.read().await;
        if !data.syncing {
            return None;
        }
        let active = data.active.as_ref()?;
        match active.stage {
            SyncStage::CFiltersFetch => Some(active.cfilters.general),
            SyncStage::HeadersFetch => Some(active.headers.general),
            SyncStage::AddressDiscovery => Some(active.discovery.general),
            SyncStage::HeadersRescan => Some(active.rescan.general),
            SyncStage::Invalid => None,
        }
    }

    /// Best block across all managed wallets.
    pub async fn best_block(&self) -> Option<BlockInfo> {
        self.core.data.read().await.best_block()
    }

    /// Lowest best block across all managed wallets.
    pub async fn lowest_block(&self) -> Option<BlockInfo> {
        self.core.data.read().await.lowest_block()
    }

    /// Whether the given wallet has reported synced.
    pub async fn is_wallet_synced(&self, wallet_id: WalletId) -> SyncResult<bool> {
        let data = self.core.data.read().await;
        data.wallets
            .get(&wallet_id)
            .map(|w| w.synced)
            .ok_or(SyncError::WalletNotFound(wallet_id))
    }

    /// Whether the given wallet is part of an active sync run.
    pub async fn is_wallet_syncing(&self, wallet_id: WalletId) -> SyncResult<bool> {
        let data = self.core.data.read().await;
        data.wallets
            .get(&wallet_id)
            .map(|w| w.syncing)
            .ok_or(SyncError::WalletNotFound(wallet_id))
    }

    /// Whether the given wallet is still waiting for headers.
    pub async fn is_wallet_waiting(&self, wallet_id: WalletId) -> SyncResult<bool> {
        let data = self.core.data.read().await;
        data.wallets
            .get(&wallet_id)
            .map(|w| w.waiting_for_headers)
            .ok_or(SyncError::WalletNotFound(wallet_id))
    }

    /// Report externally-observed dead time (device sleep, app suspend).
    ///
    /// The accumulated seconds shift the active stage's start timestamp at
    /// the next progress computation, so estimates see only active time.
    /// With no peers connected an extra reconnect allowance is charged.
    pub async fn account_for_inactivity(&self, total_inactive_secs: i64) {
        let mut data = self.core.data.write().await;
        if !data.syncing || data.active.is_none() {
            tracing::debug!("Not accounting for inactive time, the session is not syncing.");
            return;
        }
        let mut seconds = total_inactive_secs;
        if data.connected_peers == 0 {
            seconds += self.core.config.tuning.peerless_reconnect_allowance_secs;
        }
        if let Some(active) = data.active.as_mut() {
            active.inactivity.record(seconds);
        }
    }

    /// Enable or disable the human-oriented progress log lines.
    pub async fn set_sync_logs_enabled(&self, enabled: bool) {
        self.core.data.write().await.show_logs = enabled;
    }

    /// Register a progress listener under a unique key.
    ///
    /// If a run is active the listener immediately receives the current
    /// stage's last-known report, so a late-joining observer is not left
    /// blank.
    pub async fn add_sync_progress_listener(
        &self,
        listener: Arc<dyn SyncProgressListener>,
        key: &str,
    ) -> SyncResult<()> {
        self.core.registry.add(listener, key).await?;
        self.publish_last_sync_progress(key).await
    }

    /// Remove a progress listener. No-op when the key is not registered.
    pub async fn remove_sync_progress_listener(&self, key: &str) {
        self.core.registry.remove(key).await;
    }

    /// Whether a listener is registered under the key.
    pub async fn is_listener_registered(&self, key: &str) -> bool {
        self.core.registry.contains(key).await
    }

    /// Deliver the current stage's last-known report to one listener.
    pub async fn publish_last_sync_progress(&self, key: &str) -> SyncResult<()> {
        let listener = self
            .core
            .registry
            .get(key)
            .await
            .ok_or_else(|| SyncError::InvalidState(format!("no listener registered: {}", key)))?;

        enum LastReport {
            CFilters(crate::types::CFiltersFetchProgress),
            Headers(crate::types::HeadersFetchProgress),
            Discovery(crate::types::AddressDiscoveryProgress),
            Rescan(crate::types::HeadersRescanProgress),
        }

        let report = {
            let data = self.core.data.read().await;
            match (&data.active, data.syncing) {
                (Some(active), true) => match active.stage {
                    SyncStage::CFiltersFetch => Some(LastReport::CFilters(active.cfilters.clone())),
                    SyncStage::HeadersFetch => Some(LastReport::Headers(active.headers.clone())),
                    SyncStage::AddressDiscovery => {
                        Some(LastReport::Discovery(active.discovery.clone()))
                    }
                    SyncStage::HeadersRescan => Some(LastReport::Rescan(active.rescan.clone())),
                    SyncStage::Invalid => None,
                },
                _ => None,
            }
        };

        match report {
            Some(LastReport::CFilters(r)) => listener.on_cfilters_fetch_progress(&r),
            Some(LastReport::Headers(r)) => listener.on_headers_fetch_progress(&r),
            Some(LastReport::Discovery(r)) => listener.on_address_discovery_progress(&r),
            Some(LastReport::Rescan(r)) => listener.on_headers_rescan_progress(&r),
            None => {}
        }
        Ok(())
    }

    /// Whether a standalone rescan is active.
    pub async fn is_rescanning(&self) -> bool {
        self.core.data.read().await.rescanning
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession").finish_non_exhaustive()
    }
}
