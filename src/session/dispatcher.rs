//! The per-run dispatcher task.
//!
//! One task per sync run multiplexes three things in a single select loop:
//! the engine's blocking run future, the engine's event stream, and the
//! 1 Hz address-discovery timer. Keeping the timer here (instead of a
//! dedicated ticker task) means cancellation can never leak a timer across
//! restarts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::events::ChainEvent;

use super::SessionCore;

/// Drive one engine run to completion and tear the session down afterwards.
///
/// The `terminated` token is tripped last, after all teardown and end-of-run
/// notifications, so `cancel_sync` callers observe a fully unwound session.
pub(crate) async fn run_dispatcher(
    core: Arc<SessionCore>,
    events_tx: mpsc::UnboundedSender<ChainEvent>,
    mut events_rx: mpsc::UnboundedReceiver<ChainEvent>,
    persistent_peers: Vec<String>,
    cancel: CancellationToken,
    terminated: CancellationToken,
) {
    let engine = core.engine.clone();
    let mut run_fut = Box::pin(engine.run(persistent_peers, events_tx, cancel.clone()));

    let mut discovery_timer: Option<Interval> = None;
    let mut events_open = true;

    let run_result = loop {
        tokio::select! {
            result = &mut run_fut => break result,

            maybe_event = events_rx.recv(), if events_open => {
                match maybe_event {
                    Some(event) => {
                        core.dispatch_event(event).await;
                        sync_discovery_timer(&core, &mut discovery_timer).await;
                    }
                    // Engine dropped its sender; keep waiting on the run
                    // future without spinning on a closed channel.
                    None => events_open = false,
                }
            }

            _ = tick(&mut discovery_timer), if discovery_timer.is_some() => {
                if !core.discovery_tick().await {
                    discovery_timer = None;
                }
            }
        }
    };

    core.reset_sync_data().await;
    core.notify_run_ended(run_result).await;
    terminated.cancel();
}

/// Arm or disarm the local discovery timer to match the session state.
async fn sync_discovery_timer(core: &SessionCore, timer: &mut Option<Interval>) {
    let armed = {
        let data = core.data.read().await;
        data.active.as_ref().map(|a| a.discovery_armed).unwrap_or(false)
    };
    match (armed, timer.is_some()) {
        (true, false) => {
            // First fire one period from now, not immediately.
            let period = Duration::from_secs(1);
            *timer = Some(tokio::time::interval_at(Instant::now() + period, period));
        }
        (false, true) => *timer = None,
        _ => {}
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        // Branch is disabled by its select precondition when unarmed.
        None => std::future::pending().await,
    }
}
