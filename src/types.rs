//! Common type definitions for the sync engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a managed wallet.
pub type WalletId = i32;

/// One phase of the sync pipeline.
///
/// Transitions are strictly forward within a session; every new session
/// restarts at [`SyncStage::CFiltersFetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncStage {
    /// No sync session is active.
    Invalid,
    /// Fetching compact block filters.
    CFiltersFetch,
    /// Fetching block headers.
    HeadersFetch,
    /// Discovering used wallet addresses.
    AddressDiscovery,
    /// Rescanning fetched headers against wallet addresses.
    HeadersRescan,
}

impl SyncStage {
    /// Numeric stage value exposed to embedders (GUI/FFI layers).
    pub fn as_i32(self) -> i32 {
        match self {
            SyncStage::Invalid => -1,
            SyncStage::CFiltersFetch => 0,
            SyncStage::HeadersFetch => 1,
            SyncStage::AddressDiscovery => 2,
            SyncStage::HeadersRescan => 3,
        }
    }

    /// Human-readable stage name.
    pub fn name(self) -> &'static str {
        match self {
            SyncStage::Invalid => "invalid",
            SyncStage::CFiltersFetch => "cfilters fetch",
            SyncStage::HeadersFetch => "headers fetch",
            SyncStage::AddressDiscovery => "address discovery",
            SyncStage::HeadersRescan => "headers rescan",
        }
    }
}

impl Default for SyncStage {
    fn default() -> Self {
        SyncStage::Invalid
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Overall progress pair carried by every stage report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSyncProgress {
    /// Whole-pipeline completion percentage (0-100).
    pub total_sync_progress: i32,
    /// Estimated seconds until the whole pipeline completes.
    pub total_time_remaining_secs: i64,
}

/// Progress report for the CFilter fetch stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CFiltersFetchProgress {
    /// Overall pipeline progress.
    pub general: GeneralSyncProgress,
    /// Unix timestamp at which this stage began (shifted forward by
    /// reported inactivity).
    pub start_timestamp: i64,
    /// Total filters this stage is expected to fetch.
    pub total_cfilters_to_fetch: i32,
    /// Height of the most recently fetched filter batch.
    pub current_cfilter_height: i32,
    /// Filters fetched so far in this session.
    pub total_fetched_cfilters: i32,
    /// Stage completion percentage (0-100, non-decreasing).
    pub cfilters_fetch_progress: i32,
    /// Seconds this stage took, set once at stage end (0 until then).
    pub stage_time_spent: i64,
}

/// Progress report for the header fetch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersFetchProgress {
    /// Overall pipeline progress.
    pub general: GeneralSyncProgress,
    /// Unix timestamp at which this stage began (-1 before the stage
    /// starts; shifted forward by reported inactivity).
    pub start_timestamp: i64,
    /// Estimated total headers to fetch, derived from the last fetched
    /// header's timestamp and the chain's target block interval.
    pub total_headers_to_fetch: i32,
    /// Height of the most recently fetched header.
    pub current_header_height: i32,
    /// Timestamp of the most recently fetched header.
    pub current_header_timestamp: i64,
    /// Headers fetched so far in this session.
    pub total_fetched_headers: i32,
    /// Stage completion percentage (0-100, non-decreasing).
    pub headers_fetch_progress: i32,
    /// Seconds this stage took; -1 until the stage ends, then set exactly
    /// once and floored to the configured minimum.
    pub stage_time_spent: i64,
}

impl Default for HeadersFetchProgress {
    fn default() -> Self {
        Self {
            general: GeneralSyncProgress::default(),
            start_timestamp: -1,
            total_headers_to_fetch: 0,
            current_header_height: 0,
            current_header_timestamp: 0,
            total_fetched_headers: 0,
            headers_fetch_progress: 0,
            stage_time_spent: -1,
        }
    }
}

/// Progress report for the address discovery stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDiscoveryProgress {
    /// Overall pipeline progress.
    pub general: GeneralSyncProgress,
    /// Unix timestamp at which discovery began (-1 before it starts).
    pub start_timestamp: i64,
    /// Wallet currently running discovery.
    pub wallet_id: WalletId,
    /// Stage completion percentage against the estimated discovery time
    /// (0-100, non-decreasing).
    pub address_discovery_progress: i32,
    /// Seconds this stage took; -1 until the stage ends.
    pub stage_time_spent: i64,
}

impl Default for AddressDiscoveryProgress {
    fn default() -> Self {
        Self {
            general: GeneralSyncProgress::default(),
            start_timestamp: -1,
            wallet_id: 0,
            address_discovery_progress: 0,
            stage_time_spent: -1,
        }
    }
}

/// Progress report for a headers rescan, used both by the final sync stage
/// and by standalone per-wallet rescans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersRescanProgress {
    /// Overall pipeline progress. For standalone rescans this mirrors the
    /// rescan's own percentage and remaining time.
    pub general: GeneralSyncProgress,
    /// Unix timestamp at which the rescan began.
    pub start_timestamp: i64,
    /// Wallet being rescanned.
    pub wallet_id: WalletId,
    /// Headers the rescan will walk.
    pub total_headers_to_scan: i32,
    /// Height scanned through so far.
    pub current_rescan_height: i32,
    /// Rescan completion percentage (0-100, non-decreasing).
    pub rescan_progress: i32,
    /// Estimated seconds until the rescan completes.
    pub rescan_time_remaining: i64,
    /// Seconds the rescan took, set once at rescan end (0 until then).
    pub stage_time_spent: i64,
}

/// Raw elapsed/remaining seconds published alongside every progress
/// recomputation, for embedders that render their own timing displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugTimes {
    /// Seconds elapsed across all stages so far.
    pub total_elapsed_secs: i64,
    /// Estimated seconds remaining across all stages.
    pub total_remaining_secs: i64,
    /// Seconds elapsed in the current stage.
    pub stage_elapsed_secs: i64,
    /// Estimated seconds remaining in the current stage.
    pub stage_remaining_secs: i64,
}

/// Snapshot of an active standalone rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanSnapshot {
    /// Wallet being rescanned.
    pub wallet_id: WalletId,
    /// Height scanned through so far.
    pub current_height: i32,
    /// Height the rescan is walking toward.
    pub target_height: i32,
    /// Unix timestamp at which the rescan began.
    pub start_timestamp: i64,
}

/// Height and timestamp of a wallet's best known block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block height.
    pub height: i32,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
}

/// Render a remaining-time estimate the way progress UIs display it.
pub fn format_time_remaining(seconds: i64) -> String {
    let minutes = seconds / 60;
    if minutes > 0 {
        format!("{} min", minutes)
    } else {
        format!("{} sec", seconds)
    }
}
