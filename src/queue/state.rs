use crate::catalog::WorkItem;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Bounded FIFO of items waiting for a thumbnail
///
/// Enqueue never blocks: once the queue holds `capacity` items further
/// requests are rejected and logged.
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Add an item. Returns false without touching the queue when it is full
    /// or the item already has its thumbnail.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        if item.thumbnail_generated {
            debug!(id = %item.id, "Thumbnail already generated, not queueing");
            return false;
        }

        let mut items = self.lock();
        if items.len() >= self.capacity {
            warn!(
                id = %item.id,
                capacity = self.capacity,
                "Thumbnail queue full, rejecting item"
            );
            return false;
        }
        items.push_back(item);
        true
    }

    pub fn try_dequeue(&self) -> Option<WorkItem> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    fn item(id: usize) -> WorkItem {
        WorkItem::new(id.to_string(), PathBuf::from(format!("/models/{}.stl", id)))
    }

    #[test]
    fn rejects_beyond_capacity_without_mutation() {
        let queue = WorkQueue::new(3);
        for i in 0..3 {
            assert!(queue.enqueue(item(i)));
        }
        assert!(!queue.enqueue(item(3)));
        assert_eq!(queue.len(), 3);

        let ids: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[test]
    fn rejects_items_with_existing_thumbnail() {
        let queue = WorkQueue::new(10);
        let mut done = item(1);
        done.thumbnail_generated = true;
        assert!(!queue.enqueue(done));
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let queue = WorkQueue::new(1);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(WorkQueue::new(100));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    (0..50)
                        .filter(|i| queue.enqueue(item(t * 1000 + i)))
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 100);
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn concurrent_consumers_never_share_an_item() {
        let queue = Arc::new(WorkQueue::new(1000));
        for i in 0..1000 {
            queue.enqueue(item(i));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(item) = queue.try_dequeue() {
                        taken.push(item.id);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}
