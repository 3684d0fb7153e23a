//! Per-adapter pending-work queue and the tick seam that drives dispatch.
//!
//! Each queue has a single writer (the orchestrator's enqueue) and a single
//! reader (its adapter's dispatch loop). The liveness monitor only reads the
//! head id. An entry stays at the head, marked `Submitted`, while its batch
//! is in flight, so a stuck submission remains observable.

use crate::types::{Batch, BatchId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Lifecycle of a queue entry. Terminal entries are removed immediately and
/// never resubmitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug)]
pub struct QueueEntry {
    pub batch: Batch,
    pub state: EntryState,
}

/// Strict-FIFO queue of batches for one dispatch key.
#[derive(Default)]
pub struct TxQueue {
    inner: Mutex<VecDeque<QueueEntry>>,
}

impl TxQueue {
    pub fn new() -> Self {
        TxQueue::default()
    }

    /// Non-blocking append; called from the orchestrator.
    pub fn push(&self, batch: Batch) {
        self.inner.lock().unwrap().push_back(QueueEntry {
            batch,
            state: EntryState::Pending,
        });
    }

    /// Takes the oldest pending batch for dispatch, leaving the entry at the
    /// head in `Submitted` state until `complete` is called. Returns `None`
    /// when the queue is empty or the head is already in flight.
    pub fn begin(&self) -> Option<Batch> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.front_mut()?;
        if entry.state != EntryState::Pending {
            return None;
        }
        entry.state = EntryState::Submitted;
        Some(entry.batch.clone())
    }

    /// Finalizes the in-flight head entry and removes it. The terminal state
    /// is recorded before removal so the transition is explicit.
    pub fn complete(&self, id: BatchId, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.front_mut() {
            if entry.batch.id == id && entry.state == EntryState::Submitted {
                entry.state = if success {
                    EntryState::Confirmed
                } else {
                    EntryState::Failed
                };
                inner.pop_front();
            }
        }
    }

    /// Head batch id, for the liveness monitor. `None` for an empty queue.
    pub fn head_id(&self) -> Option<BatchId> {
        self.inner.lock().unwrap().front().map(|e| e.batch.id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Tick seam for dispatch and monitor loops, so tests can drive them
/// deterministically instead of waiting on wall-clock timers.
#[async_trait]
pub trait TickSource: Send {
    async fn tick(&mut self);
}

/// Production tick source backed by a tokio interval.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // A slow network call must not cause a burst of catch-up ticks.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        IntervalTicker { interval }
    }
}

#[async_trait]
impl TickSource for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
