//! Bounded priority queue for event intake.
//!
//! Keyed by aggregate salience with two refinements: threat events sort
//! ahead of everything regardless of score, and equal priorities drain
//! in arrival order. The queue is bounded; a full queue rejects the
//! publish synchronously and the sensor retries with backoff.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use gladys_core::Event;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Returned when the queue is at capacity.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue_full")]
pub struct QueueFull;

/// An event with its queue position.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: Event,
    /// Aggregate salience (or the default for unscored events).
    pub priority: f64,
    /// Threat pre-emption flag; sorts ahead of any priority.
    pub threat: bool,
    seq: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.threat
            .cmp(&other.threat)
            .then_with(|| {
                self.priority
                    .partial_cmp(&other.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            // Earlier arrivals first among equals (max-heap, so reverse).
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded max-heap of pending events.
pub struct EventQueue {
    heap: Mutex<BinaryHeap<QueuedEvent>>,
    notify: Notify,
    capacity: usize,
    seq: AtomicU64,
}

impl EventQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Admit an event. Fails synchronously when the queue is full;
    /// callers surface `queue_full` to the sensor, which retries with
    /// exponential backoff.
    pub async fn push(&self, event: Event, priority: f64, threat: bool) -> Result<(), QueueFull> {
        {
            let mut heap = self.heap.lock().await;
            if heap.len() >= self.capacity {
                return Err(QueueFull);
            }
            heap.push(QueuedEvent {
                event,
                priority,
                threat,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the highest-priority event, waiting for one to arrive.
    pub async fn pop(&self) -> QueuedEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(queued) = self.heap.lock().await.pop() {
                return queued;
            }
            notified.await;
        }
    }

    /// Non-blocking pop.
    pub async fn try_pop(&self) -> Option<QueuedEvent> {
        self.heap.lock().await.pop()
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn event(id: &str) -> Event {
        let mut e = Event::new("test", "something");
        e.id = id.to_string();
        e
    }

    #[tokio::test]
    async fn pops_in_descending_priority() {
        let queue = EventQueue::new(16);
        queue.push(event("low"), 0.2, false).await.unwrap();
        queue.push(event("high"), 0.9, false).await.unwrap();
        queue.push(event("mid"), 0.5, false).await.unwrap();

        assert_eq!(queue.try_pop().await.unwrap().event.id, "high");
        assert_eq!(queue.try_pop().await.unwrap().event.id, "mid");
        assert_eq!(queue.try_pop().await.unwrap().event.id, "low");
    }

    #[tokio::test]
    async fn threat_preempts_any_priority() {
        let queue = EventQueue::new(16);
        queue.push(event("urgent"), 0.99, false).await.unwrap();
        queue.push(event("threat"), 0.1, true).await.unwrap();

        assert_eq!(queue.try_pop().await.unwrap().event.id, "threat");
        assert_eq!(queue.try_pop().await.unwrap().event.id, "urgent");
    }

    #[tokio::test]
    async fn equal_priorities_drain_fifo() {
        let queue = EventQueue::new(16);
        for i in 0..5 {
            queue.push(event(&format!("e-{i}")), 0.5, false).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.try_pop().await.unwrap().event.id, format!("e-{i}"));
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_synchronously() {
        let queue = EventQueue::new(2);
        queue.push(event("a"), 0.5, false).await.unwrap();
        queue.push(event("b"), 0.5, false).await.unwrap();
        assert_eq!(queue.push(event("c"), 0.9, false).await, Err(QueueFull));
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let queue = std::sync::Arc::new(EventQueue::new(4));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.event.id })
        };
        tokio::task::yield_now().await;
        queue.push(event("later"), 0.5, false).await.unwrap();
        assert_eq!(waiter.await.unwrap(), "later");
    }

    proptest! {
        // Invariant: drain order is monotonically non-increasing in
        // priority, modulo the threat pre-emption rule.
        #[test]
        fn drain_order_is_monotone(priorities in prop::collection::vec((0.0f64..1.0, any::<bool>()), 1..64)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let queue = EventQueue::new(priorities.len());
                for (i, (priority, threat)) in priorities.iter().enumerate() {
                    queue.push(event(&format!("e-{i}")), *priority, *threat).await.unwrap();
                }

                let mut last: Option<QueuedEvent> = None;
                while let Some(queued) = queue.try_pop().await {
                    if let Some(prev) = &last {
                        // Threats first; within a threat class, priority
                        // never increases.
                        prop_assert!(prev.threat >= queued.threat);
                        if prev.threat == queued.threat {
                            prop_assert!(prev.priority >= queued.priority);
                        }
                    }
                    last = Some(queued);
                }
                Ok(())
            })?;
        }
    }
}
