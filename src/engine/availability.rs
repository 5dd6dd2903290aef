use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Probe {
    available: bool,
    checked_at: Instant,
}

/// Remembers the last availability probe for a fixed time
///
/// Concurrent callers on a cold cache wait for a single probe instead of
/// each spawning their own. The lock is private to the cache.
pub struct AvailabilityCache {
    ttl: Duration,
    last: Mutex<Option<Probe>>,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    /// Return the cached answer, running `probe` only when it has expired
    pub async fn get_or_probe<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut last = self.last.lock().await;
        if let Some(cached) = *last
            && cached.checked_at.elapsed() < self.ttl
        {
            return cached.available;
        }

        let available = probe().await;
        debug!(available, "Engine availability probed");
        *last = Some(Probe {
            available,
            checked_at: Instant::now(),
        });
        available
    }

    /// Cached answer if it is still fresh
    pub async fn cached(&self) -> Option<bool> {
        self.last
            .lock()
            .await
            .filter(|p| p.checked_at.elapsed() < self.ttl)
            .map(|p| p.available)
    }

    /// Forget the cached answer so the next call probes again
    pub async fn invalidate(&self) {
        *self.last.lock().await = None;
    }
}
