//! Result broadcaster: an explicit typed subscriber registry with
//! synchronous, emission-ordered delivery. No persistence — a subscriber
//! registered after an emission never sees that event.

use crate::error::NodeError;
use crate::types::{DestinationItem, QueueKey, RoutingContext, SourceWallet, TransferPurpose, TxId};
use log::warn;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

/// A party referenced by an event. Never carries key material.
#[derive(Clone, Debug, PartialEq)]
pub struct PartyRef {
    pub label: String,
    pub mention: String,
    pub address: String,
    pub owner: Option<i64>,
}

impl From<&SourceWallet> for PartyRef {
    fn from(w: &SourceWallet) -> Self {
        PartyRef {
            label: w.label.clone(),
            mention: w.mention.clone(),
            address: w.address.clone(),
            owner: w.owner,
        }
    }
}

impl From<&DestinationItem> for PartyRef {
    fn from(d: &DestinationItem) -> Self {
        PartyRef {
            label: d.label.clone(),
            mention: d.mention.clone(),
            address: d.address.clone(),
            owner: d.owner,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransferEvent {
    /// One confirmed-submission leg. A multi-output batch emits one of these
    /// per destination item, all carrying the same transaction hash.
    Success {
        purpose: TransferPurpose,
        source: PartyRef,
        dest: PartyRef,
        value: Decimal,
        coin: String,
        context: RoutingContext,
        tx_hash: TxId,
    },
    /// A whole batch failed during dispatch. Exactly one per failed batch;
    /// the batch is dropped and never retried.
    Error {
        purpose: TransferPurpose,
        chat_id: i64,
        message_id: i64,
        reason: String,
    },
    /// The liveness monitor saw no progress on a queue between polls.
    Hang { key: QueueKey },
}

pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn on_event(&self, event: &TransferEvent) -> Result<(), NodeError>;
}

/// Single-process publish/subscribe hub. `emit` delivers to subscribers in
/// registration order on the emitting task; subscriber errors are logged
/// and swallowed, never propagated back into the emitting adapter.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    pub fn emit(&self, event: TransferEvent) {
        let subscribers = self.subscribers.lock().unwrap().clone();
        for subscriber in subscribers {
            if let Err(e) = subscriber.on_event(&event) {
                warn!("subscriber {} failed: {}", subscriber.name(), e);
            }
        }
    }
}
