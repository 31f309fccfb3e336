// src/recording/event_queue.rs
//! Bounded lock-free event queue
//!
//! Producers are framers and the turn runner; the host drains it between
//! turns. When full, new events are dropped and counted.

use crate::observability::metrics;
use crate::recording::event::SandboxEvent;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Lock-free event queue
pub struct EventQueue {
    queue: ArrayQueue<SandboxEvent>,
    push_count: AtomicU64,
    pop_count: AtomicU64,
    drop_count: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Push an event (non-blocking); a full queue hands the event back
    pub fn push(&self, event: SandboxEvent) -> Result<(), SandboxEvent> {
        match self.queue.push(event) {
            Ok(()) => {
                self.push_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(event) => {
                let dropped = self.drop_count.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped();
                if dropped == 0 {
                    warn!("Event queue full, dropping {} events", event.kind());
                }
                Err(event)
            }
        }
    }

    /// Push, dropping the event if the queue is full
    pub fn report(&self, event: SandboxEvent) {
        let _ = self.push(event);
    }

    pub fn try_pop(&self) -> Option<SandboxEvent> {
        let event = self.queue.pop()?;
        self.pop_count.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Remove and return every queued event in arrival order
    pub fn drain(&self) -> Vec<SandboxEvent> {
        let mut events = Vec::with_capacity(self.queue.len());
        while let Some(event) = self.try_pop() {
            events.push(event);
        }
        events
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    /// Events lost to a full queue since creation
    pub fn dropped(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub push_count: u64,
    pub pop_count: u64,

    /// Events lost because the queue was full
    pub drop_count: u64,

    pub current_size: usize,
    pub capacity: usize,
}

impl QueueStats {
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::team::Team;
    use std::sync::Arc;

    fn truncated(actor_id: u32) -> SandboxEvent {
        SandboxEvent::OutputTruncated {
            team: Team::A,
            actor_id,
            round: 1,
        }
    }

    #[test]
    fn test_full_default_queue_counts_every_drop() {
        let queue = EventQueue::new(65_536);
        for id in 0..65_536 {
            queue.report(truncated(id));
        }
        assert_eq!(queue.len(), 65_536);
        assert_eq!(queue.dropped(), 0);

        for id in 0..10 {
            queue.report(truncated(id));
        }
        assert_eq!(queue.dropped(), 10);
        assert_eq!(queue.stats().push_count, 65_536);

        // Draining makes room again but keeps the tally
        assert_eq!(queue.drain().len(), 65_536);
        queue.report(truncated(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dropped(), 10);
    }

    #[test]
    fn test_drain_preserves_order() {
        let queue = EventQueue::new(10);
        queue.push(truncated(1)).unwrap();
        queue.push(truncated(2)).unwrap();

        let events = queue.drain();
        assert_eq!(events, vec![truncated(1), truncated(2)]);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().pop_count, 2);
    }

    #[test]
    fn test_queue_full() {
        let queue = EventQueue::new(2);
        queue.push(truncated(1)).unwrap();
        queue.push(truncated(2)).unwrap();

        assert!(queue.push(truncated(3)).is_err());
        queue.report(truncated(4));

        let stats = queue.stats();
        assert_eq!(stats.drop_count, 2);
        assert_eq!(stats.push_count, 2);
        assert_eq!(stats.fill_percentage(), 100.0);
    }

    #[test]
    fn test_concurrent_producers() {
        use std::thread;

        let queue = Arc::new(EventQueue::new(1000));
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for j in 0..100 {
                        q.report(truncated(i * 100 + j));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.stats().drop_count, 0);
    }
}
