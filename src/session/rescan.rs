//! Standalone per-wallet blocks rescan.
//!
//! Re-walks already-downloaded headers for a single wallet, with its own
//! cancellation and progress reporting. Mutually exclusive with an active
//! sync run in both directions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::WalletBackend;
use crate::error::{SyncError, SyncResult, WalletError};
use crate::estimator::{self, estimate_stage_total, now_unix, stage_fraction};
use crate::types::{GeneralSyncProgress, HeadersRescanProgress, WalletId};

use super::state::StandaloneRescan;
use super::{SessionCore, SyncSession};

impl SyncSession {
    /// Rescan a wallet's full block history.
    pub async fn rescan_blocks(&self, wallet_id: WalletId) -> SyncResult<()> {
        self.start_rescan(wallet_id, 0).await
    }

    /// Rescan a wallet's block history from the given height.
    ///
    /// Fails when the wallet is unknown, has no network backend, a rescan
    /// is already running, or the session is syncing / not yet synced.
    pub async fn start_rescan(&self, wallet_id: WalletId, from_height: i32) -> SyncResult<()> {
        let (backend, cancel, terminated) = {
            let mut data = self.core.data.write().await;
            let wallet =
                data.wallets.get(&wallet_id).ok_or(SyncError::WalletNotFound(wallet_id))?;
            if !wallet.backend.has_network_backend() {
                return Err(SyncError::NotConnected);
            }
            if data.rescanning {
                return Err(SyncError::AlreadyRescanning);
            }
            if data.syncing {
                return Err(SyncError::InvalidState("sync in progress".to_string()));
            }
            if !data.synced {
                return Err(SyncError::InvalidState("wallets are not synced".to_string()));
            }

            let backend = wallet.backend.clone();
            let cancel = CancellationToken::new();
            let terminated = CancellationToken::new();
            data.rescanning = true;
            data.rescan_cancel = Some(cancel.clone());
            data.rescan_terminated = Some(terminated.clone());
            data.standalone_rescan = Some(StandaloneRescan {
                wallet_id,
                current_height: from_height,
                target_height: backend.best_block_height(),
                start_timestamp: now_unix(),
            });
            (backend, cancel, terminated)
        };

        tokio::spawn(run_rescan(
            self.core.clone(),
            wallet_id,
            from_height,
            backend,
            cancel,
            terminated,
        ));
        Ok(())
    }

    /// Snapshot of the active standalone rescan, if any.
    pub async fn rescan_snapshot(&self) -> Option<crate::types::RescanSnapshot> {
        let data = self.core.data.read().await;
        data.standalone_rescan.as_ref().map(|r| crate::types::RescanSnapshot {
            wallet_id: r.wallet_id,
            current_height: r.current_height,
            target_height: r.target_height,
            start_timestamp: r.start_timestamp,
        })
    }

    /// Cancel the active standalone rescan, if any.
    ///
    /// Blocks until the rescan task has fully unwound, mirroring the sync
    /// cancellation contract.
    pub async fn cancel_rescan(&self) {
        let (cancel, terminated) = {
            let data = self.core.data.read().await;
            (data.rescan_cancel.clone(), data.rescan_terminated.clone())
        };
        let Some(cancel) = cancel else {
            return;
        };
        cancel.cancel();
        if let Some(terminated) = terminated {
            terminated.cancelled().await;
        }
        tracing::info!("Rescan canceled.");
    }
}

async fn run_rescan(
    core: Arc<SessionCore>,
    wallet_id: WalletId,
    from_height: i32,
    backend: Arc<dyn WalletBackend>,
    cancel: CancellationToken,
    terminated: CancellationToken,
) {
    core.notify_listeners(|l| l.on_blocks_rescan_started(wallet_id)).await;

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<i32>();
    let mut rescan_fut =
        Box::pin(backend.rescan_from_height(from_height, progress_tx, cancel.clone()));

    let start_timestamp = now_unix();
    let mut last_percent = 0;
    let mut ticks_open = true;

    let rescan_result = loop {
        tokio::select! {
            result = &mut rescan_fut => break result,

            maybe_height = progress_rx.recv(), if ticks_open => {
                match maybe_height {
                    Some(scanned_through) => {
                        let report = build_progress_report(
                            &backend,
                            wallet_id,
                            scanned_through,
                            start_timestamp,
                            &mut last_percent,
                        );
                        {
                            let mut data = core.data.write().await;
                            if let Some(rescan) = data.standalone_rescan.as_mut() {
                                rescan.current_height = scanned_through;
                                rescan.target_height = report.total_headers_to_scan;
                            }
                        }
                        core.notify_listeners(|l| l.on_blocks_rescan_progress(&report)).await;
                    }
                    None => ticks_open = false,
                }
            }
        }
    };

    let ended_error: Option<WalletError> = if cancel.is_cancelled() {
        tracing::info!("Rescan canceled through shutdown request");
        None
    } else {
        match rescan_result {
            Ok(()) => finish_rescan(&backend, from_height).await.err(),
            Err(err) => {
                tracing::error!("Rescan failed: {}", err);
                Some(err)
            }
        }
    };

    {
        let mut data = core.data.write().await;
        data.rescanning = false;
        data.rescan_cancel = None;
        data.rescan_terminated = None;
        data.standalone_rescan = None;
    }

    core.notify_listeners(|l| l.on_blocks_rescan_ended(wallet_id, ended_error.as_ref())).await;
    terminated.cancel();
}

/// Persist the rescan outcome: a full rescan rebuilds the transaction
/// index from scratch, a height-bounded rescan records its resume
/// checkpoint before indexing.
async fn finish_rescan(backend: &Arc<dyn WalletBackend>, from_height: i32) -> Result<(), WalletError> {
    if from_height == 0 {
        backend.reindex_transactions().await
    } else {
        backend.save_rescan_checkpoint(from_height).await?;
        backend.index_transactions().await
    }
}

fn build_progress_report(
    backend: &Arc<dyn WalletBackend>,
    wallet_id: WalletId,
    scanned_through: i32,
    start_timestamp: i64,
    last_percent: &mut i32,
) -> HeadersRescanProgress {
    let total_headers_to_scan = backend.best_block_height();
    let fraction = stage_fraction(scanned_through as i64, total_headers_to_scan as i64);

    let elapsed = now_unix() - start_timestamp;
    let est_total = estimator::round_secs(estimate_stage_total(elapsed, fraction));
    let remaining = (est_total - elapsed).max(0);

    let percent = (*last_percent).max(estimator::percentage(fraction * 100.0, 100.0));
    *last_percent = percent;

    HeadersRescanProgress {
        general: GeneralSyncProgress {
            total_sync_progress: percent,
            total_time_remaining_secs: remaining,
        },
        start_timestamp,
        wallet_id,
        total_headers_to_scan,
        current_rescan_height: scanned_through,
        rescan_progress: percent,
        rescan_time_remaining: remaining,
        stage_time_spent: 0,
    }
}
