//! Pure progress and ETA calculation.
//!
//! All estimation here is heuristic rate extrapolation: given how long the
//! active stage has run and what fraction of its items is done, project the
//! stage total, then extend to the whole pipeline using recorded times for
//! completed stages and tuned fractions for stages that have not run yet.

use std::time::{SystemTime, UNIX_EPOCH};

/// Tuning values for the pipeline estimate.
///
/// The stage-weight fractions are empirical: real header/discovery/rescan
/// ratios vary by network, so embedders may override them through
/// [`SyncConfig`](crate::config::SyncConfig).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorTuning {
    /// Scale factor applied to the header-fetch estimate projected from the
    /// CFilter fetch rate (the filter fetch runs faster than header fetch,
    /// so the projection is divided by this).
    pub cfilters_fetch_factor: f64,
    /// Estimated address-discovery time as a fraction of the header-fetch
    /// estimate.
    pub discovery_fraction: f64,
    /// Estimated rescan time as a fraction of the header-fetch estimate.
    pub rescan_fraction: f64,
    /// Early header-fetch estimates run low; inflate the estimate by this
    /// factor scaled down as the stage progresses.
    pub headers_fetch_adjustment: f64,
    /// Minimum recorded header-fetch stage time in seconds. Keeps the
    /// downstream discovery/rescan estimates stable on fast networks.
    pub min_headers_fetch_secs: i64,
    /// Extra inactivity charged when the session goes inactive with no
    /// connected peers, covering the expected reconnect time.
    pub peerless_reconnect_allowance_secs: i64,
}

impl Default for EstimatorTuning {
    fn default() -> Self {
        Self {
            cfilters_fetch_factor: 0.38,
            discovery_fraction: 0.8,
            rescan_fraction: 0.1,
            headers_fetch_adjustment: 0.5,
            min_headers_fetch_secs: 150,
            peerless_reconnect_allowance_secs: 60,
        }
    }
}

/// Current unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Floor an elapsed-seconds value to 1 so rate division is defined at t≈0.
pub fn floor_elapsed(elapsed_secs: i64) -> i64 {
    elapsed_secs.max(1)
}

/// Fraction of a stage complete, guarded against empty or inverted totals.
pub fn stage_fraction(processed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (processed as f64 / total as f64).clamp(0.0, 1.0)
}

/// Project the total time a stage will take from its elapsed time and
/// completed fraction. Returns `elapsed` unchanged when the fraction is
/// still zero (nothing to extrapolate from).
pub fn estimate_stage_total(elapsed_secs: i64, fraction: f64) -> f64 {
    let elapsed = floor_elapsed(elapsed_secs) as f64;
    if fraction <= 0.0 {
        return elapsed;
    }
    elapsed / fraction
}

/// Estimate how many block headers exist after the given header timestamp,
/// from the chain's target block interval.
pub fn estimate_headers_after(
    now_unix: i64,
    last_header_timestamp: i64,
    target_secs_per_block: i64,
) -> i32 {
    if target_secs_per_block <= 0 {
        return 0;
    }
    let time_difference = (now_unix - last_header_timestamp).max(0) as f64;
    (time_difference / target_secs_per_block as f64).ceil() as i32
}

/// Percentage of `part` in `whole`, rounded, clamped to 0-100.
pub fn percentage(part: f64, whole: f64) -> i32 {
    if whole <= 0.0 {
        return 0;
    }
    ((part / whole) * 100.0).round().clamp(0.0, 100.0) as i32
}

/// Round a fractional seconds estimate to whole seconds, never negative.
pub fn round_secs(secs: f64) -> i64 {
    secs.round().max(0.0) as i64
}
