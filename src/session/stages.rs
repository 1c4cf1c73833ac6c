//! Stage controllers.
//!
//! One handler per external event, ported around a common shape: mutate
//! the stage trackers under the write lock, clone the updated report,
//! release the lock, then publish. Listener callbacks never run while the
//! session lock is held.

use crate::error::EngineError;
use crate::estimator::{
    self, estimate_headers_after, estimate_stage_total, floor_elapsed, now_unix, stage_fraction,
};
use crate::events::ChainEvent;
use crate::types::{DebugTimes, SyncStage, WalletId};

use super::SessionCore;

impl SessionCore {
    /// Route one engine event to its stage handler.
    pub(crate) async fn dispatch_event(&self, event: ChainEvent) {
        tracing::trace!("Dispatching {}", event.description());
        match event {
            ChainEvent::PeerConnected {
                peer_count,
                ..
            }
            | ChainEvent::PeerDisconnected {
                peer_count,
                ..
            } => self.handle_peer_count_update(peer_count).await,
            ChainEvent::CFiltersFetchStarted {
                wallet_id,
            } => self.handle_cfilters_fetch_started(wallet_id).await,
            ChainEvent::CFiltersFetchProgress {
                wallet_id,
                start_height,
                end_height,
            } => self.handle_cfilters_fetch_progress(wallet_id, start_height, end_height).await,
            ChainEvent::CFiltersFetchFinished {
                ..
            } => self.handle_cfilters_fetch_finished().await,
            ChainEvent::HeadersFetchStarted {
                peer_initial_height,
            } => self.handle_headers_fetch_started(peer_initial_height).await,
            ChainEvent::HeadersFetchProgress {
                last_header_height,
                last_header_timestamp,
            } => self.handle_headers_fetch_progress(last_header_height, last_header_timestamp).await,
            ChainEvent::HeadersFetchFinished => self.handle_headers_fetch_finished().await,
            ChainEvent::AddressDiscoveryStarted {
                wallet_id,
            } => self.handle_address_discovery_started(wallet_id).await,
            ChainEvent::AddressDiscoveryFinished {
                ..
            } => self.handle_address_discovery_finished().await,
            ChainEvent::RescanStarted {
                wallet_id,
            } => self.handle_stage_rescan_started(wallet_id).await,
            ChainEvent::RescanProgress {
                wallet_id,
                scanned_through,
            } => self.handle_stage_rescan_progress(wallet_id, scanned_through).await,
            ChainEvent::RescanFinished {
                wallet_id,
            } => self.handle_stage_rescan_finished(wallet_id).await,
            ChainEvent::WalletSynced {
                wallet_id,
                synced,
            } => self.handle_wallet_synced(wallet_id, synced).await,
        }
    }

    async fn handle_peer_count_update(&self, peer_count: i32) {
        let should_log = {
            let mut data = self.data.write().await;
            data.connected_peers = peer_count;
            data.show_logs && data.syncing
        };

        self.notify_listeners(|l| l.on_peer_count_changed(peer_count)).await;

        if should_log {
            if peer_count == 1 {
                tracing::info!("Connected to {} peer.", peer_count);
            } else {
                tracing::info!("Connected to {} peers.", peer_count);
            }
        }
    }

    // CFilters fetch

    async fn handle_cfilters_fetch_started(&self, _wallet_id: WalletId) {
        let mut data = self.data.write().await;
        if !data.syncing {
            return;
        }
        let Some(active) = data.active.as_mut() else {
            return;
        };
        // The engine reports a start once per connected peer.
        if active.cfilters.start_timestamp != 0 {
            return;
        }

        active.stage = SyncStage::CFiltersFetch;
        active.cfilters.start_timestamp = now_unix();
        active.cfilters.total_fetched_cfilters = 0;
        let show_logs = data.show_logs;
        drop(data);

        if show_logs {
            tracing::info!("Fetching missing compact filters.");
        }
    }

    async fn handle_cfilters_fetch_progress(
        &self,
        wallet_id: WalletId,
        start_height: i32,
        end_height: i32,
    ) {
        let tuning = self.config.tuning;
        let target_spb = self.config.target_secs_per_block;

        let reports = {
            let mut guard = self.data.write().await;
            let data = &mut *guard;
            if !data.syncing {
                return;
            }
            let Some(wallet) = data.wallets.get(&wallet_id) else {
                return;
            };
            let wallet_best_height = wallet.backend.best_block_height();
            let wallet_best_timestamp = wallet.backend.best_block_timestamp();
            let Some(active) = data.active.as_mut() else {
                return;
            };

            if active.cfilters_start_height == -1 {
                active.cfilters_start_height = start_height;
            }
            active.cfilters.total_fetched_cfilters += end_height - start_height;

            let total_to_fetch = wallet_best_height - active.cfilters_start_height;
            let fraction =
                stage_fraction(active.cfilters.total_fetched_cfilters as i64, total_to_fetch as i64);

            // Shift the stage start forward by any reported dead time, so
            // the clock was effectively paused while the device slept.
            active.inactivity.shift(&mut active.cfilters.start_timestamp);
            let now = now_unix();
            let elapsed = floor_elapsed(now - active.cfilters.start_timestamp);
            let est_cfilters_total = estimate_stage_total(elapsed, fraction);

            // Project the header-fetch time from the filter fetch rate and
            // the estimated header backlog, scaled by the fetch factor.
            let cfilters_rate = active.cfilters.total_fetched_cfilters as f64 / elapsed as f64;
            let est_headers_left = estimate_headers_after(now, wallet_best_timestamp, target_spb);
            let est_headers_time = if cfilters_rate > 0.0 {
                (est_headers_left as f64 / cfilters_rate) / tuning.cfilters_fetch_factor
            } else {
                0.0
            };

            let est_discovery = est_headers_time * tuning.discovery_fraction;
            let est_rescan = est_headers_time * tuning.rescan_fraction;
            let est_total_sync = est_cfilters_total + est_headers_time + est_discovery + est_rescan;

            let total_remaining = estimator::round_secs(est_total_sync) - elapsed;

            active.cfilters.total_cfilters_to_fetch = total_to_fetch;
            active.cfilters.current_cfilter_height = start_height;
            active.cfilters.cfilters_fetch_progress = active
                .cfilters
                .cfilters_fetch_progress
                .max(estimator::percentage(fraction * 100.0, 100.0));
            active.cfilters.general.total_sync_progress = estimator::percentage(elapsed as f64, est_total_sync);
            active.cfilters.general.total_time_remaining_secs = total_remaining;

            let debug = DebugTimes {
                total_elapsed_secs: elapsed,
                total_remaining_secs: total_remaining,
                stage_elapsed_secs: elapsed,
                stage_remaining_secs: estimator::round_secs(est_cfilters_total - elapsed as f64),
            };
            (active.cfilters.clone(), debug)
        };

        let (report, debug) = reports;
        self.notify_listeners(|l| l.on_cfilters_fetch_progress(&report)).await;
        self.notify_listeners(|l| l.on_debug_times(&debug)).await;
    }

    async fn handle_cfilters_fetch_finished(&self) {
        let mut data = self.data.write().await;
        if !data.syncing {
            return;
        }
        let Some(active) = data.active.as_mut() else {
            return;
        };

        let mut time_spent = now_unix() - active.cfilters.start_timestamp;
        // Dead time reported during this stage does not count against it.
        time_spent -= active.inactivity.drain();
        active.cfilters.stage_time_spent = time_spent.max(0);
        active.stage = SyncStage::HeadersFetch;
    }

    // Headers fetch

    async fn handle_headers_fetch_started(&self, peer_initial_height: i32) {
        let mut guard = self.data.write().await;
        let data = &mut *guard;
        if !data.syncing {
            return;
        }
        let Some(active) = data.active.as_mut() else {
            return;
        };
        // Reported once per newly connected peer; only the first counts.
        if active.headers.start_timestamp != -1 {
            return;
        }

        for wallet in data.wallets.values_mut() {
            wallet.waiting_for_headers = true;
        }
        let lowest_height = data
            .wallets
            .values()
            .map(|w| w.backend.best_block_height())
            .min()
            .unwrap_or(0);

        active.stage = SyncStage::HeadersFetch;
        active.headers.start_timestamp = now_unix();
        active.headers_start_height = lowest_height;
        active.headers.total_fetched_headers = 0;
        active.inactivity.drain();
        let show_logs = data.show_logs;
        drop(guard);

        if show_logs {
            tracing::info!(
                "Step 1 of 3 - fetching {} block headers.",
                peer_initial_height - lowest_height
            );
        }
    }

    async fn handle_headers_fetch_progress(
        &self,
        last_header_height: i32,
        last_header_timestamp: i64,
    ) {
        let tuning = self.config.tuning;
        let target_spb = self.config.target_secs_per_block;

        let reports = {
            let mut guard = self.data.write().await;
            let data = &mut *guard;
            if !data.syncing {
                return;
            }
            let Some(active) = data.active.as_mut() else {
                return;
            };
            // Also reported per peer; ignore once the stage has finished.
            if active.headers.stage_time_spent != -1 {
                return;
            }

            for wallet in data.wallets.values_mut() {
                if wallet.waiting_for_headers {
                    wallet.waiting_for_headers =
                        wallet.backend.best_block_height() > last_header_height;
                }
            }

            if last_header_height > active.headers_start_height {
                active.headers.total_fetched_headers =
                    last_header_height - active.headers_start_height;
            }

            let now = now_unix();
            let headers_left = estimate_headers_after(now, last_header_timestamp, target_spb);
            let total_headers = last_header_height + headers_left;
            let fraction =
                stage_fraction(active.headers.total_fetched_headers as i64, total_headers as i64);

            active.inactivity.shift(&mut active.headers.start_timestamp);
            let elapsed = floor_elapsed(now - active.headers.start_timestamp);

            // The raw extrapolation runs low early in the stage; inflate it
            // by a factor that shrinks as the stage progresses.
            let mut est_headers_total = estimate_stage_total(elapsed, fraction);
            est_headers_total += est_headers_total * tuning.headers_fetch_adjustment * (1.0 - fraction);

            let est_discovery = est_headers_total * tuning.discovery_fraction;
            let est_rescan = est_headers_total * tuning.rescan_fraction;
            let cfilters_spent = active.cfilters.stage_time_spent.max(0);
            let est_total_sync =
                cfilters_spent as f64 + est_headers_total + est_discovery + est_rescan;

            let total_remaining = estimator::round_secs(est_total_sync) - elapsed;

            active.headers.total_headers_to_fetch = total_headers;
            active.headers.current_header_height = last_header_height;
            active.headers.current_header_timestamp = last_header_timestamp;
            active.headers.headers_fetch_progress = active
                .headers
                .headers_fetch_progress
                .max(estimator::percentage(fraction * 100.0, 100.0));
            active.headers.general.total_sync_progress =
                estimator::percentage(elapsed as f64, est_total_sync);
            active.headers.general.total_time_remaining_secs = total_remaining;

            let debug = DebugTimes {
                total_elapsed_secs: cfilters_spent + elapsed,
                total_remaining_secs: total_remaining,
                stage_elapsed_secs: elapsed,
                stage_remaining_secs: estimator::round_secs(est_headers_total - elapsed as f64),
            };
            (active.headers.clone(), debug)
        };

        let (report, debug) = reports;
        self.notify_listeners(|l| l.on_headers_fetch_progress(&report)).await;
        self.notify_listeners(|l| l.on_debug_times(&debug)).await;
    }

    async fn handle_headers_fetch_finished(&self) {
        let mut data = self.data.write().await;
        if !data.syncing {
            return;
        }
        let Some(active) = data.active.as_mut() else {
            return;
        };
        if active.headers.stage_time_spent != -1 {
            return;
        }

        active.headers_start_height = -1;
        active.headers.total_fetched_headers = 0;

        let mut time_spent = now_unix() - active.headers.start_timestamp;
        time_spent -= active.inactivity.drain();

        // Floor the recorded time so the discovery and rescan estimates
        // derived from it stay usable on fast networks.
        let floor = self.config.tuning.min_headers_fetch_secs;
        if time_spent < floor {
            time_spent = floor;
        }
        active.headers.stage_time_spent = time_spent;
        active.stage = SyncStage::AddressDiscovery;

        let show_logs = data.show_logs;
        drop(data);
        if show_logs {
            tracing::info!("Fetch headers completed.");
        }
    }

    // Address discovery

    async fn handle_address_discovery_started(&self, wallet_id: WalletId) {
        let mut data = self.data.write().await;
        if !data.syncing {
            return;
        }
        let Some(active) = data.active.as_mut() else {
            return;
        };
        if active.discovery.start_timestamp != -1 {
            return;
        }

        active.stage = SyncStage::AddressDiscovery;
        active.discovery.start_timestamp = now_unix();
        active.discovery.wallet_id = wallet_id;
        // The engine emits no incremental progress for this stage; the
        // dispatcher's 1 Hz timer recomputes and republishes instead.
        active.discovery_armed = true;

        let show_logs = data.show_logs;
        drop(data);
        if show_logs {
            tracing::info!("Step 2 of 3 - discovering used addresses.");
        }
    }

    /// One tick of the discovery timer. Returns false once the timer
    /// should stop (stage finished, sync ended, or session canceled).
    pub(crate) async fn discovery_tick(&self) -> bool {
        let tuning = self.config.tuning;

        let reports = {
            let mut data = self.data.write().await;
            if !data.syncing {
                return false;
            }
            let show_logs = data.show_logs;
            let Some(active) = data.active.as_mut() else {
                return false;
            };
            if !active.discovery_armed {
                return false;
            }

            active.inactivity.shift(&mut active.discovery.start_timestamp);

            let cfilters_spent = active.cfilters.stage_time_spent.max(0) as f64;
            let headers_spent = active.headers.stage_time_spent.max(0) as f64;
            let est_discovery = headers_spent * tuning.discovery_fraction;
            let est_rescan = headers_spent * tuning.rescan_fraction;

            let elapsed = (now_unix() - active.discovery.start_timestamp).max(0) as f64;

            // Once discovery overruns its estimate, the overrun counts
            // toward the total so overall percent keeps moving.
            let total_sync_time =
                cfilters_spent + headers_spent + elapsed.max(est_discovery) + est_rescan;
            let total_elapsed = cfilters_spent + headers_spent + elapsed;

            let remaining_discovery = (est_discovery - elapsed).round().max(0.0);
            let total_remaining = estimator::round_secs(remaining_discovery + est_rescan);

            active.discovery.address_discovery_progress = active
                .discovery
                .address_discovery_progress
                .max(estimator::percentage(elapsed, est_discovery));
            active.discovery.general.total_sync_progress =
                estimator::percentage(total_elapsed, total_sync_time);
            active.discovery.general.total_time_remaining_secs = total_remaining;

            let debug = DebugTimes {
                total_elapsed_secs: estimator::round_secs(total_elapsed),
                total_remaining_secs: total_remaining,
                stage_elapsed_secs: estimator::round_secs(elapsed),
                stage_remaining_secs: estimator::round_secs(remaining_discovery),
            };
            (active.discovery.clone(), debug, show_logs)
        };

        let (report, debug, show_logs) = reports;
        if show_logs {
            tracing::info!(
                "Syncing {}%, {} remaining, discovering used addresses.",
                report.general.total_sync_progress,
                crate::types::format_time_remaining(report.general.total_time_remaining_secs),
            );
        }
        self.notify_listeners(|l| l.on_address_discovery_progress(&report)).await;
        self.notify_listeners(|l| l.on_debug_times(&debug)).await;
        true
    }

    async fn handle_address_discovery_finished(&self) {
        let show_logs = {
            let mut data = self.data.write().await;
            if !data.syncing {
                return;
            }
            self.stop_discovery(&mut data);
            if let Some(active) = data.active.as_mut() {
                active.stage = SyncStage::HeadersRescan;
            }
            data.show_logs
        };
        if show_logs {
            tracing::info!("Address discovery complete.");
        }
    }

    /// Disarm the discovery timer and freeze the stage time. Safe to call
    /// when discovery never started or has already stopped.
    pub(crate) fn stop_discovery(&self, data: &mut super::state::SyncData) {
        if let Some(active) = data.active.as_mut() {
            if active.discovery_armed {
                active.discovery_armed = false;
                active.discovery.stage_time_spent =
                    now_unix() - active.discovery.start_timestamp;
            }
        }
    }

    // Headers rescan (final sync stage)

    async fn handle_stage_rescan_started(&self, wallet_id: WalletId) {
        let mut data = self.data.write().await;
        self.stop_discovery(&mut data);
        if !data.syncing {
            return;
        }
        let Some(active) = data.active.as_mut() else {
            return;
        };

        active.stage = SyncStage::HeadersRescan;
        active.rescan.start_timestamp = now_unix();
        active.rescan.wallet_id = wallet_id;
        // Carry the overall numbers over from the discovery phase so the
        // total percent does not jump backwards at the stage boundary.
        active.rescan.general = active.discovery.general;

        let show_logs = data.show_logs;
        drop(data);
        if show_logs {
            tracing::info!("Step 3 of 3 - Scanning block headers.");
        }
    }

    async fn handle_stage_rescan_progress(&self, wallet_id: WalletId, scanned_through: i32) {
        let reports = {
            let mut guard = self.data.write().await;
            let data = &mut *guard;
            if !data.syncing {
                return;
            }
            let Some(wallet) = data.wallets.get(&wallet_id) else {
                return;
            };
            let total_headers_to_scan = wallet.backend.best_block_height();
            let show_logs = data.show_logs;
            let Some(active) = data.active.as_mut() else {
                return;
            };

            let fraction = stage_fraction(scanned_through as i64, total_headers_to_scan as i64);

            active.inactivity.shift(&mut active.rescan.start_timestamp);
            let elapsed = now_unix() - active.rescan.start_timestamp;
            let est_total_rescan = estimator::round_secs(estimate_stage_total(elapsed, fraction));
            let rescan_remaining = (est_total_rescan - elapsed).max(0);

            active.rescan.wallet_id = wallet_id;
            active.rescan.total_headers_to_scan = total_headers_to_scan;
            active.rescan.current_rescan_height = scanned_through;
            active.rescan.rescan_progress = active
                .rescan
                .rescan_progress
                .max(estimator::percentage(fraction * 100.0, 100.0));
            active.rescan.rescan_time_remaining = rescan_remaining;

            let cfilters_spent = active.cfilters.stage_time_spent.max(0);
            let headers_spent = active.headers.stage_time_spent.max(0);
            let discovery_spent = active.discovery.stage_time_spent.max(0);
            let total_elapsed = cfilters_spent + headers_spent + discovery_spent + elapsed;

            // With zero elapsed time the rescan estimate is also zero,
            // which would make the pipeline look complete; skip the
            // overall update until the clock has moved.
            if elapsed > 0 {
                let est_total_sync =
                    cfilters_spent + headers_spent + discovery_spent + est_total_rescan;
                active.rescan.general.total_sync_progress =
                    estimator::percentage(total_elapsed as f64, est_total_sync as f64);
                active.rescan.general.total_time_remaining_secs = rescan_remaining;
            }

            let debug = DebugTimes {
                total_elapsed_secs: total_elapsed,
                total_remaining_secs: active.rescan.general.total_time_remaining_secs,
                stage_elapsed_secs: elapsed,
                stage_remaining_secs: rescan_remaining,
            };
            (active.rescan.clone(), debug, show_logs)
        };

        let (report, debug, show_logs) = reports;
        self.notify_listeners(|l| l.on_headers_rescan_progress(&report)).await;
        self.notify_listeners(|l| l.on_debug_times(&debug)).await;

        if show_logs {
            tracing::info!(
                "Syncing {}%, {} remaining, scanning {} of {} block headers.",
                report.general.total_sync_progress,
                crate::types::format_time_remaining(report.general.total_time_remaining_secs),
                report.current_rescan_height,
                report.total_headers_to_scan,
            );
        }
    }

    async fn handle_stage_rescan_finished(&self, wallet_id: WalletId) {
        let report = {
            let mut data = self.data.write().await;
            if !data.syncing {
                return;
            }
            let Some(active) = data.active.as_mut() else {
                return;
            };

            active.rescan.wallet_id = wallet_id;
            active.rescan.general.total_time_remaining_secs = 0;
            active.rescan.general.total_sync_progress = 100;
            active.rescan.stage_time_spent = now_unix() - active.rescan.start_timestamp;

            // Re-arm discovery bookkeeping so the next wallet's discovery
            // phase is not mistaken for a duplicate start.
            active.discovery.start_timestamp = -1;
            active.discovery.stage_time_spent = -1;

            active.rescan.clone()
        };

        self.notify_listeners(|l| l.on_headers_rescan_progress(&report)).await;
    }

    // Wallet completion

    async fn handle_wallet_synced(&self, wallet_id: WalletId, synced: bool) {
        let already_all_synced = self.data.read().await.synced;
        if already_all_synced && synced {
            self.index_transactions_and_notify(synced).await;
            return;
        }

        let session_complete = {
            let mut data = self.data.write().await;
            match data.wallets.get_mut(&wallet_id) {
                Some(wallet) => {
                    wallet.synced = synced;
                    wallet.syncing = false;
                }
                None => {
                    tracing::error!("Synced report for unknown wallet {}", wallet_id);
                    return;
                }
            }

            if data.all_wallets_synced() {
                data.syncing = false;
                data.synced = true;
                // The run is over from the pipeline's perspective; the
                // ephemeral state must not outlive the syncing flag.
                self.stop_discovery(&mut data);
                data.active = None;
                true
            } else {
                false
            }
        };

        if session_complete {
            self.index_transactions_and_notify(synced).await;
        }
    }

    async fn index_transactions_and_notify(&self, synced: bool) {
        let backends: Vec<_> = {
            let data = self.data.read().await;
            data.wallets.values().map(|w| w.backend.clone()).collect()
        };
        for backend in backends {
            if let Err(err) = backend.index_transactions().await {
                tracing::error!("Tx index error: {}", err);
            }
        }

        if synced {
            self.notify_listeners(|l| l.on_sync_completed()).await;
        } else {
            self.notify_listeners(|l| l.on_sync_canceled(false)).await;
        }
    }

    // Run teardown

    /// Reset all ephemeral state after the engine run ends, for any
    /// reason. Wallet flags go back to waiting-for-headers so a later
    /// start begins from a clean slate.
    pub(crate) async fn reset_sync_data(&self) {
        let mut data = self.data.write().await;
        self.stop_discovery(&mut data);
        data.syncing = false;
        data.synced = false;
        data.cancel = None;
        data.terminated = None;
        data.active = None;
        for wallet in data.wallets.values_mut() {
            wallet.waiting_for_headers = true;
            wallet.syncing = false;
        }
    }

    /// Deliver the end-of-run notification matching how the engine
    /// returned. Exactly one of canceled / ended-with-error fires per run
    /// (a clean return fires neither; completion was already delivered via
    /// the synced path).
    pub(crate) async fn notify_run_ended(&self, result: Result<(), EngineError>) {
        match result {
            Ok(()) => {
                tracing::debug!("Sync engine returned cleanly");
            }
            Err(EngineError::Canceled) => {
                let will_restart = self.data.read().await.restart_requested;
                self.notify_listeners(|l| l.on_sync_canceled(will_restart)).await;
            }
            Err(err) => {
                tracing::error!("Sync ended with error: {}", err);
                self.notify_listeners(|l| l.on_sync_ended_with_error(&err)).await;
            }
        }
    }
}
