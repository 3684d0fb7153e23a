//! Liveness monitor. Polls every adapter's queue heads on a fixed cadence
//! and flags queues whose head batch has not moved between polls. It only
//! observes — it never pops or mutates a queue.
//!
//! A single stalled platform raises `Hang` events so operators can react;
//! a full stall (every non-empty queue stuck past the strike budget) asks
//! the supervisor to shut the process down through the watch channel
//! instead of killing it from inside.

use crate::events::{EventBus, TransferEvent};
use crate::platform::PlatformAdapter;
use crate::queue::TickSource;
use crate::types::{BatchId, QueueKey};
use log::{error, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub struct LivenessMonitor {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    bus: Arc<EventBus>,
    /// Head id seen at the previous poll, per queue key. A key is absent
    /// while its queue is empty, so an empty queue can never look stalled.
    snapshots: Mutex<HashMap<QueueKey, BatchId>>,
    /// Consecutive stalled polls per queue key.
    strikes: Mutex<HashMap<QueueKey, u32>>,
    shutdown: watch::Sender<bool>,
    max_strikes: u32,
}

impl LivenessMonitor {
    /// The returned receiver reads `true` once the monitor decides the
    /// whole engine is wedged; the supervisor owns what happens next.
    pub fn new(
        adapters: Vec<Arc<dyn PlatformAdapter>>,
        bus: Arc<EventBus>,
        max_strikes: u32,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (shutdown, receiver) = watch::channel(false);
        let monitor = Arc::new(LivenessMonitor {
            adapters,
            bus,
            snapshots: Mutex::new(HashMap::new()),
            strikes: Mutex::new(HashMap::new()),
            shutdown,
            max_strikes,
        });
        (monitor, receiver)
    }

    /// One comparison pass over every queue head. Returns `true` when a
    /// full-stall shutdown was requested.
    pub fn poll(&self) -> bool {
        let mut snapshots = self.snapshots.lock().unwrap();
        let mut strikes = self.strikes.lock().unwrap();
        let mut active = 0usize;
        let mut stalled_past_budget = 0usize;

        for adapter in &self.adapters {
            for (key, head) in adapter.queue_heads() {
                match head {
                    None => {
                        snapshots.remove(&key);
                        strikes.remove(&key);
                    }
                    Some(id) => {
                        active += 1;
                        if snapshots.get(&key) == Some(&id) {
                            let count = strikes.entry(key.clone()).or_insert(0);
                            *count += 1;
                            warn!(
                                "queue {} stalled on batch {} ({} consecutive polls)",
                                key, id, count
                            );
                            if *count >= self.max_strikes {
                                stalled_past_budget += 1;
                            }
                            self.bus.emit(TransferEvent::Hang { key });
                        } else {
                            snapshots.insert(key.clone(), id);
                            strikes.remove(&key);
                        }
                    }
                }
            }
        }

        if active > 0 && stalled_past_budget == active {
            error!("all {} active queues stalled past the strike budget, requesting shutdown", active);
            let _ = self.shutdown.send(true);
            return true;
        }
        false
    }

    /// Monitoring loop; exits once a shutdown has been requested.
    pub async fn run(self: Arc<Self>, mut ticker: Box<dyn TickSource>) {
        loop {
            ticker.tick().await;
            if self.poll() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::mocks::RecordingSubscriber;
    use crate::types::{Batch, GeneratedWallet};
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    /// Adapter stand-in whose queue heads are set directly by the test.
    struct StubAdapter {
        name: &'static str,
        heads: Mutex<Vec<(QueueKey, Option<BatchId>)>>,
    }

    impl StubAdapter {
        fn new(name: &'static str, heads: Vec<(&str, Option<BatchId>)>) -> Arc<Self> {
            Arc::new(StubAdapter {
                name,
                heads: Mutex::new(
                    heads
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v))
                        .collect(),
                ),
            })
        }

        fn set_head(&self, key: &str, head: Option<BatchId>) {
            for entry in self.heads.lock().unwrap().iter_mut() {
                if entry.0 == key {
                    entry.1 = head;
                }
            }
        }
    }

    #[async_trait]
    impl PlatformAdapter for StubAdapter {
        fn platform(&self) -> &str {
            self.name
        }
        async fn get_balance(&self, _: &str, _: &str) -> Result<Decimal, EngineError> {
            Ok(Decimal::ZERO)
        }
        async fn get_tx_fee(&self, _: &str) -> Result<Decimal, EngineError> {
            Ok(Decimal::ZERO)
        }
        fn check_address(&self, _: &str) -> bool {
            true
        }
        fn generate_wallet(&self) -> Result<GeneratedWallet, EngineError> {
            Err(EngineError::Unsupported("stub".into()))
        }
        fn enqueue(&self, _: Batch) -> Result<(), EngineError> {
            Ok(())
        }
        fn queue_heads(&self) -> Vec<(QueueKey, Option<BatchId>)> {
            self.heads.lock().unwrap().clone()
        }
        async fn dispatch_once(&self) {}
    }

    fn hang_count(subscriber: &RecordingSubscriber) -> usize {
        subscriber
            .events()
            .iter()
            .filter(|e| matches!(e, TransferEvent::Hang { .. }))
            .count()
    }

    #[test]
    fn empty_queue_never_hangs() {
        let adapter = StubAdapter::new("ether", vec![("ether:ETH", None)]);
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("rec"));
        bus.subscribe(subscriber.clone());
        let (monitor, _rx) = LivenessMonitor::new(vec![adapter], bus, 3);
        for _ in 0..5 {
            assert!(!monitor.poll());
        }
        assert_eq!(hang_count(&subscriber), 0);
    }

    #[test]
    fn unchanged_head_hangs_on_the_second_poll_and_every_poll_after() {
        let adapter = StubAdapter::new("ether", vec![("ether:ETH", Some(7))]);
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("rec"));
        bus.subscribe(subscriber.clone());
        let (monitor, _rx) = LivenessMonitor::new(vec![adapter], bus, 100);

        monitor.poll();
        assert_eq!(hang_count(&subscriber), 0);
        monitor.poll();
        assert_eq!(hang_count(&subscriber), 1);
        monitor.poll();
        assert_eq!(hang_count(&subscriber), 2);
    }

    #[test]
    fn progress_resets_the_strike_count() {
        let adapter = StubAdapter::new("ether", vec![("ether:ETH", Some(1))]);
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("rec"));
        bus.subscribe(subscriber.clone());
        let (monitor, rx) = LivenessMonitor::new(vec![adapter.clone()], bus, 2);

        monitor.poll();
        monitor.poll(); // strike 1
        adapter.set_head("ether:ETH", Some(2)); // head moved
        assert!(!monitor.poll());
        monitor.poll(); // strike 1 again, budget not reached
        assert!(!*rx.borrow());
        assert_eq!(hang_count(&subscriber), 2);
    }

    #[test]
    fn full_stall_requests_shutdown() {
        let adapter = StubAdapter::new("ether", vec![("ether:ETH", Some(5))]);
        let bus = Arc::new(EventBus::new());
        let (monitor, rx) = LivenessMonitor::new(vec![adapter], bus, 2);

        assert!(!monitor.poll()); // snapshot
        assert!(!monitor.poll()); // strike 1
        assert!(monitor.poll()); // strike 2: budget hit, everything stalled
        assert!(*rx.borrow());
    }

    #[test]
    fn partial_stall_only_notifies() {
        let stuck = StubAdapter::new("ether", vec![("ether:ETH", Some(5))]);
        let moving = StubAdapter::new("bitcoin", vec![("bitcoin", Some(1))]);
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("rec"));
        bus.subscribe(subscriber.clone());
        let (monitor, rx) = LivenessMonitor::new(vec![stuck, moving.clone()], bus, 2);

        let mut next = 2u64;
        for _ in 0..6 {
            assert!(!monitor.poll());
            moving.set_head("bitcoin", Some(next));
            next += 1;
        }
        // The stuck platform keeps hanging but the healthy one holds the
        // engine up.
        assert!(hang_count(&subscriber) >= 4);
        assert!(!*rx.borrow());
    }

    #[test]
    fn queue_drained_between_polls_clears_state() {
        let adapter = StubAdapter::new("ether", vec![("ether:ETH", Some(3))]);
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("rec"));
        bus.subscribe(subscriber.clone());
        let (monitor, _rx) = LivenessMonitor::new(vec![adapter.clone()], bus, 2);

        monitor.poll();
        adapter.set_head("ether:ETH", None);
        monitor.poll();
        // Same batch id shows up again later: it is new work relative to an
        // empty snapshot, not a stall.
        adapter.set_head("ether:ETH", Some(3));
        monitor.poll();
        assert_eq!(hang_count(&subscriber), 0);
    }
}
