use super::{Shared, start_pool};
use crate::engine::RenderEngine;
use crate::store::StatusStore;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

/// Periodically restart the pool when items sit in the queue with no workers
///
/// Runs until the shutdown channel flips to true or its sender is dropped.
pub(super) async fn run_watchdog<E: RenderEngine, S: StatusStore>(
    shared: Arc<Shared<E, S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = Instant::now() + shared.config.watchdog_initial_delay();
    let mut ticks = interval_at(start, shared.config.watchdog_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(
        interval_ms = shared.config.watchdog_interval_ms,
        "Queue watchdog started"
    );

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                if restart_if_stranded(&shared) {
                    debug!("Watchdog restarted the worker pool");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Queue watchdog stopped");
}

/// Start the pool when items are queued but no workers are running.
/// Returns whether a new pool was started.
fn restart_if_stranded<E: RenderEngine, S: StatusStore>(shared: &Arc<Shared<E, S>>) -> bool {
    let queued = shared.queue.len();
    if queued == 0 || shared.processing.load(Ordering::Acquire) {
        return false;
    }

    warn!(queued, "Queued thumbnails with no active workers, restarting pool");
    start_pool(shared)
}
