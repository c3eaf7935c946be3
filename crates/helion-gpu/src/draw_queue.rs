//! Thread-safe per-frame draw submission lists.
//!
//! Multiple producer threads append render objects and transforms while the
//! single frame loop thread snapshots and clears the list once per frame.
//! The snapshot swaps the backing storage under the lock, so producers never
//! observe a half-drained list and the consumer builds draw calls from a
//! private copy.

use parking_lot::Mutex;

/// A mutex-guarded list of pending per-frame items.
pub struct DrawQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> DrawQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Append one item.
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Append a batch of items under a single lock acquisition.
    pub fn extend(&self, iter: impl IntoIterator<Item = T>) {
        self.items.lock().extend(iter);
    }

    /// Atomically take every pending item, leaving the queue empty.
    pub fn drain_snapshot(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue has no pending items.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for DrawQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn snapshot_takes_everything_and_clears() {
        let queue = DrawQueue::new();
        queue.push(1);
        queue.extend([2, 3]);

        let snapshot = queue.drain_snapshot();
        assert_eq!(snapshot, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(DrawQueue::new());
        let producers = 4;
        let per_producer = 1000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.push(p * per_producer + i);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut snapshot = queue.drain_snapshot();
        snapshot.sort_unstable();
        let expected: Vec<_> = (0..producers * per_producer).collect();
        assert_eq!(snapshot, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn snapshot_races_cleanly_with_producers() {
        let queue = Arc::new(DrawQueue::new());
        let total = 10_000;

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..total {
                    queue.push(i);
                }
            })
        };

        let mut collected = Vec::new();
        while collected.len() < total {
            collected.extend(queue.drain_snapshot());
        }
        producer.join().unwrap();
        collected.extend(queue.drain_snapshot());

        collected.sort_unstable();
        let expected: Vec<_> = (0..total).collect();
        assert_eq!(collected, expected);
    }
}
