//! An in-process, at-least-once work queue: one named topic per worker
//! category, string payloads, `Ack`/`Reject` semantics, and a cleaner that
//! reaps deliveries whose consumer died without acking. A single-region
//! deployment needs nothing heavier than channels plus this bookkeeping;
//! see the module-level note on the queue library this replaces.
//!
//! Ordering across consumers is not guaranteed and is not required by any
//! caller: concurrent checks of the same entity are already prevented by
//! the scheduler-side dedup lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::debug;

/// One delivered message. `tag` identifies it for `ack`/`reject`; dropping
/// a `Delivery` without acking leaves it in-flight until the cleaner reaps
/// it on its unacked-past-threshold sweep.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub payload: String,
}

struct InFlight {
    payload: String,
    leased_at: Instant,
}

struct State {
    ready: VecDeque<String>,
    in_flight: HashMap<u64, InFlight>,
    next_tag: u64,
}

/// A named queue. Cheap to clone; every clone shares the same backing
/// state and notifies the same waiters.
#[derive(Clone)]
pub struct Queue {
    name: String,
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish()
    }
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(State {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
                next_tag: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes a string payload — a decimal primary key for most
    /// categories, a hex APNs token for `live-activities`.
    pub async fn publish(&self, payload: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.ready.push_back(payload.into());
        drop(state);
        self.notify.notify_one();
    }

    /// Leases the next ready payload, or waits for one to arrive. Callers
    /// hold at most one outstanding delivery at a time per consumer task
    /// (the prefetch buffer is the number of consumer tasks times two,
    /// enforced by how many of them call `consume` concurrently).
    pub async fn consume(&self) -> Delivery {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(payload) = state.ready.pop_front() {
                    let tag = state.next_tag;
                    state.next_tag += 1;
                    state.in_flight.insert(
                        tag,
                        InFlight {
                            payload: payload.clone(),
                            leased_at: Instant::now(),
                        },
                    );
                    return Delivery { tag, payload };
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks a delivery as successfully processed.
    pub async fn ack(&self, tag: u64) {
        self.state.lock().await.in_flight.remove(&tag);
    }

    /// Drops a delivery without requeueing it. Per the scheduler's
    /// recovery model, the entity is re-enqueued on the next tick rather
    /// than retried immediately (the dedup lock is released regardless of
    /// ack/reject, making it eligible again).
    pub async fn reject(&self, tag: u64) {
        self.state.lock().await.in_flight.remove(&tag);
    }

    /// Returns in-flight deliveries leased longer than `threshold` to the
    /// ready list. Guards against a consumer task that panicked or was
    /// killed mid-delivery.
    pub async fn reap_stuck(&self, threshold: Duration) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let stuck: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, v)| now.duration_since(v.leased_at) > threshold)
            .map(|(tag, _)| *tag)
            .collect();

        let count = stuck.len();
        for tag in stuck {
            if let Some(entry) = state.in_flight.remove(&tag) {
                state.ready.push_back(entry.payload);
            }
        }
        drop(state);

        if count > 0 {
            debug!(queue = %self.name, count, "reaped stuck deliveries");
            self.notify.notify_waiters();
        }

        count
    }

    pub async fn depth(&self) -> usize {
        self.state.lock().await.ready.len()
    }
}

/// Runs `consumers` concurrent handler tasks against `queue`, each
/// processing one delivery to completion before fetching the next.
/// Mirrors the teacher's worker-pool shape: per-task shutdown channel,
/// `tokio::select!` between shutdown and the next unit of work.
pub struct ConsumerPool {
    shutdown_txs: Vec<mpsc::Sender<()>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl ConsumerPool {
    pub fn spawn<F, Fut>(queue: Queue, consumers: usize, handler: F) -> Self
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut shutdown_txs = Vec::with_capacity(consumers);
        let mut handles = Vec::with_capacity(consumers);

        for id in 0..consumers {
            let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
            let queue = queue.clone();
            let handler = handler.clone();

            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(consumer = id, queue = queue.name(), "consumer shutting down");
                            break;
                        }
                        delivery = queue.consume() => {
                            handler(delivery).await;
                        }
                    }
                }
            });

            shutdown_txs.push(shutdown_tx);
            handles.push(handle);
        }

        Self { shutdown_txs, handles }
    }

    /// Signals every consumer to stop after its current delivery finishes,
    /// then awaits them — the `StopAllConsuming` half of graceful shutdown.
    pub async fn shutdown(self) {
        for tx in &self.shutdown_txs {
            let _ = tx.send(()).await;
        }
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume_roundtrips_payload() {
        let queue = Queue::new("subreddits");
        queue.publish("42").await;
        let delivery = queue.consume().await;
        assert_eq!(delivery.payload, "42");
        queue.ack(delivery.tag).await;
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn reject_does_not_requeue() {
        let queue = Queue::new("users");
        queue.publish("7").await;
        let delivery = queue.consume().await;
        queue.reject(delivery.tag).await;
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn reaper_returns_stuck_deliveries_to_ready() {
        let queue = Queue::new("trending");
        queue.publish("1").await;
        let _delivery = queue.consume().await;
        assert_eq!(queue.depth().await, 0);

        let reaped = queue.reap_stuck(Duration::from_millis(0)).await;
        assert_eq!(reaped, 1);
        assert_eq!(queue.depth().await, 1);
    }
}
