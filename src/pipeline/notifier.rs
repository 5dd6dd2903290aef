use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::error;

/// How an item reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Never sent to the engine (unsupported kind or missing file)
    Skipped,
    /// Reported by the engine while the batch streamed
    Streamed,
    /// Rendered individually after the batch lost it
    Fallback,
}

/// Terminal outcome of one item, delivered to every listener
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub item_id: String,
    pub item_name: String,
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    pub source: ResultSource,
    pub finished_at: DateTime<Utc>,
}

/// Receives progress events
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ChannelListener(mpsc::UnboundedSender<ProgressEvent>);

impl ProgressListener for ChannelListener {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver just stops listening
        let _ = self.0.send(event.clone());
    }
}

/// Synchronous fan-out of progress events, scoped to one pipeline
#[derive(Default)]
pub struct ProgressNotifier {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ProgressListener>)>>,
    next_id: AtomicU64,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: impl ProgressListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() < before
    }

    /// Receive events through a channel instead of a callback
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_listener(ChannelListener(tx));
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn notify(&self, event: &ProgressEvent) {
        // Snapshot so listeners may register or unregister from inside a callback
        let listeners: Vec<Arc<dyn ProgressListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_progress(event))).is_err() {
                error!(id = %event.item_id, "Progress listener panicked");
            }
        }
    }
}
