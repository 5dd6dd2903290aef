//! Pipeline Module
//!
//! Drives thumbnail generation: a bounded queue feeds a fixed pool of
//! workers that hand batches to the rendering engine, a watchdog restarts
//! the pool when items are stranded, and every terminal outcome is recorded
//! in the status store and fanned out to progress listeners.

pub mod notifier;
pub mod tracker;
mod watchdog;
mod worker;

pub use notifier::{ListenerId, ProgressEvent, ProgressListener, ProgressNotifier, ResultSource};
pub use tracker::{BatchTracker, TrackedJob};

use crate::catalog::WorkItem;
use crate::config::{AppConfig, PipelineConfig};
use crate::engine::{ItemResult, RenderEngine};
use crate::error::{AppError, Result};
use crate::queue::WorkQueue;
use crate::store::StatusStore;
use chrono::Utc;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// How often `wait_idle` re-checks the pool
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Counters describing what the pipeline has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub queued: usize,
    pub in_flight: usize,
}

impl PipelineStats {
    /// Accepted items without a terminal outcome yet
    pub fn pending(&self) -> usize {
        self.queued + self.in_flight
    }

    pub fn finished(&self) -> usize {
        self.generated + self.failed + self.skipped
    }
}

/// Where rendered thumbnails are written
struct OutputSettings {
    dir: PathBuf,
    extension: String,
    size: u32,
}

#[derive(Default)]
struct Counters {
    generated: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// State shared by the pipeline handle, the supervisor, workers and watchdog
struct Shared<E, S> {
    queue: WorkQueue,
    in_flight: AtomicUsize,
    processing: AtomicBool,
    stopped: AtomicBool,
    engine: E,
    store: S,
    notifier: ProgressNotifier,
    config: PipelineConfig,
    output: OutputSettings,
    counters: Counters,
}

impl<E: RenderEngine, S: StatusStore> Shared<E, S> {
    /// Record the terminal outcome of an item
    ///
    /// The caller must already own the item's finalization: a fresh dequeue
    /// or a won claim on its tracked job. The store update completes before
    /// listeners hear about it, and the item leaves the in-flight count last.
    /// Panics in the store or a listener are contained here.
    fn finalize(&self, item: &WorkItem, result: ItemResult, source: ResultSource) {
        let thumbnail = if result.success {
            result.output_path.as_deref()
        } else {
            None
        };

        let update = catch_unwind(AssertUnwindSafe(|| {
            self.store.update_artifact_status(&item.id, thumbnail, true)
        }));
        match update {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(id = %item.id, error = %e, "Failed to record thumbnail status"),
            Err(_) => error!(id = %item.id, "Status store panicked while recording thumbnail"),
        }

        let counter = match source {
            ResultSource::Skipped => &self.counters.skipped,
            _ if result.success => &self.counters.generated,
            _ => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if result.success {
            info!(
                id = %item.id,
                name = %item.name,
                output = ?result.output_path,
                source = ?source,
                "Thumbnail generated"
            );
            if let Some(meta) = &result.metadata {
                debug!(
                    id = %item.id,
                    triangles = ?meta.triangles,
                    dimensions = ?meta.dimensions,
                    "Mesh metadata"
                );
            }
        } else if source == ResultSource::Skipped {
            info!(
                id = %item.id,
                name = %item.name,
                reason = %result.error_message(),
                "Skipped thumbnail"
            );
        } else {
            warn!(
                id = %item.id,
                name = %item.name,
                error = %result.error_message(),
                source = ?source,
                "Thumbnail generation failed"
            );
        }

        let event = ProgressEvent {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            success: result.success,
            output_path: thumbnail.map(PathBuf::from),
            error: result.error,
            source,
            finished_at: Utc::now(),
        };
        self.notifier.notify(&event);

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn stats(&self) -> PipelineStats {
        PipelineStats {
            generated: self.counters.generated.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            queued: self.queue.len(),
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }
}

/// Start the worker pool unless it is already running or the pipeline stopped
fn start_pool<E: RenderEngine, S: StatusStore>(shared: &Arc<Shared<E, S>>) -> bool {
    if shared.stopped.load(Ordering::Acquire) {
        debug!("Pipeline stopped, not starting workers");
        return false;
    }
    if shared
        .processing
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }
    tokio::spawn(supervise(Arc::clone(shared)));
    true
}

/// Runs one pool generation after another while work keeps arriving
///
/// Entered with `processing` already set; clears it once the workers are
/// gone.
async fn supervise<E: RenderEngine, S: StatusStore>(shared: Arc<Shared<E, S>>) {
    loop {
        if !shared.engine.is_available().await {
            warn!(
                queued = shared.queue.len(),
                "Rendering engine unavailable, leaving items queued"
            );
            shared.processing.store(false, Ordering::Release);
            return;
        }

        let workers = shared.config.worker_count;
        info!(workers, queued = shared.queue.len(), "Starting thumbnail workers");

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(worker::run_worker(worker_id, Arc::clone(&shared)));
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Thumbnail worker ended abnormally");
            }
        }

        shared.processing.store(false, Ordering::Release);
        let stats = shared.stats();
        info!(
            generated = stats.generated,
            failed = stats.failed,
            skipped = stats.skipped,
            "Thumbnail workers finished"
        );

        // Items enqueued while the last workers were winding down
        if shared.stopped.load(Ordering::Acquire) || shared.queue.is_empty() {
            return;
        }
        if shared
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!(queued = shared.queue.len(), "More work arrived, restarting workers");
    }
}

/// Background thumbnail generation for catalog items
///
/// Must be driven from inside a tokio runtime.
pub struct ThumbnailPipeline<E: RenderEngine, S: StatusStore> {
    shared: Arc<Shared<E, S>>,
    shutdown: watch::Sender<bool>,
}

impl<E: RenderEngine, S: StatusStore> ThumbnailPipeline<E, S> {
    pub fn new(config: &AppConfig, engine: E, store: S) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.output.thumbnail_dir).map_err(|e| {
            AppError::Config(format!(
                "Failed to create thumbnail directory {}: {}",
                config.output.thumbnail_dir.display(),
                e
            ))
        })?;

        let shared = Arc::new(Shared {
            queue: WorkQueue::new(config.pipeline.queue_capacity),
            in_flight: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            engine,
            store,
            notifier: ProgressNotifier::new(),
            config: config.pipeline.clone(),
            output: OutputSettings {
                dir: config.output.thumbnail_dir.clone(),
                extension: config.output.extension.clone(),
                size: config.engine.thumbnail_size,
            },
            counters: Counters::default(),
        });
        let (shutdown, _) = watch::channel(false);

        Ok(Self { shared, shutdown })
    }

    /// Queue an item and start the pool if it is idle. Returns false when
    /// the queue is full or the item already has its thumbnail.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        if !self.shared.queue.enqueue(item) {
            return false;
        }
        start_pool(&self.shared);
        true
    }

    /// Queue every item the store reports as pending
    ///
    /// Nothing is queued when the engine is unavailable.
    pub async fn enqueue_pending(&self) -> Result<usize> {
        if !self.shared.engine.is_available().await {
            return Err(AppError::EngineUnavailable(
                "engine probe failed, pending items not queued".to_string(),
            ));
        }

        let items = self.shared.store.pending_items()?;
        let total = items.len();
        // Kinds the engine cannot render still go through the queue so they
        // reach a terminal skipped state instead of staying pending
        let accepted = items
            .into_iter()
            .map(|item| self.enqueue(item))
            .filter(|accepted| *accepted)
            .count();

        info!(accepted, total, "Queued pending thumbnails");
        Ok(accepted)
    }

    /// Start the worker pool. Returns false when it was already running
    /// or the pipeline has been stopped.
    pub fn start_processing(&self) -> bool {
        start_pool(&self.shared)
    }

    /// Spawn the watchdog that restarts the pool when items are stranded
    pub fn start_watchdog(&self) -> JoinHandle<()> {
        tokio::spawn(watchdog::run_watchdog(
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
        ))
    }

    /// Stop taking new batches and shut the watchdog down
    ///
    /// Engine calls already dispatched finish or time out on their own.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            info!(
                queued = self.shared.queue.len(),
                in_flight = self.in_flight(),
                "Stopping thumbnail pipeline"
            );
        }
        let _ = self.shutdown.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Queued plus in-flight items. Momentary, not a snapshot.
    pub fn pending_total(&self) -> usize {
        self.queue_len() + self.in_flight()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    pub fn add_listener(&self, listener: impl ProgressListener + 'static) -> ListenerId {
        self.shared.notifier.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.notifier.remove_listener(id)
    }

    /// Progress events as a channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.shared.notifier.subscribe()
    }

    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// Resolve once no workers are running and nothing is in flight
    ///
    /// Items may still be queued afterwards if the engine was unavailable.
    pub async fn wait_idle(&self) {
        while self.is_processing() || self.in_flight() > 0 {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

impl<E: RenderEngine, S: StatusStore> Drop for ThumbnailPipeline<E, S> {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
    }
}
