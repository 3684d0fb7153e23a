//! Platform adapters: one per underlying transaction model. Each adapter
//! owns its pending-work queues and dispatch loop; a slow or unreachable
//! network for one platform never delays another.

pub mod account;
pub mod ledger;
pub mod utxo;

use crate::audit::{Database, OperationRecord};
use crate::error::EngineError;
use crate::events::{EventBus, PartyRef, TransferEvent};
use crate::queue::TickSource;
use crate::types::{Batch, BatchId, DestinationItem, GeneratedWallet, QueueKey};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, warn};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Capability set shared by all platform variants.
///
/// Shared dispatch policy: strict FIFO per queue key; on success, one
/// `Success` event per destination item (fee items included); on failure,
/// exactly one `Error` event for the whole batch and the batch is dropped —
/// no automatic retry. Re-submitting under a stale nonce or re-selecting
/// spent outputs is riskier than making the caller re-issue the request.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform instance name ("ether", "bitcoin", ...), unique per engine.
    fn platform(&self) -> &str;

    async fn get_balance(&self, coin: &str, address: &str) -> Result<Decimal, EngineError>;

    /// Estimated network fee for one typical transfer, in the fee coin's
    /// native units.
    async fn get_tx_fee(&self, coin: &str) -> Result<Decimal, EngineError>;

    /// Format-only address check. No network call.
    fn check_address(&self, address: &str) -> bool;

    /// Fresh address/key pair, returned in the clear. The caller owns
    /// persistence and encryption.
    fn generate_wallet(&self) -> Result<GeneratedWallet, EngineError>;

    /// Non-blocking append to this platform's pending queue.
    fn enqueue(&self, batch: Batch) -> Result<(), EngineError>;

    /// Read-only queue-head view for the liveness monitor.
    fn queue_heads(&self) -> Vec<(QueueKey, Option<BatchId>)>;

    /// Drains at most one batch per owned queue: build, submit, notify.
    async fn dispatch_once(&self);

    /// Dispatch loop, woken by the tick source. Runs until the task is
    /// dropped at shutdown.
    async fn run(self: Arc<Self>, mut ticker: Box<dyn TickSource>) {
        loop {
            ticker.tick().await;
            self.dispatch_once().await;
        }
    }
}

/// One confirmed-submission leg: success event plus audit-log append.
/// Audit failures are logged and swallowed, never fatal to dispatch.
pub(crate) async fn record_leg(
    bus: &EventBus,
    db: &dyn Database,
    batch: &Batch,
    item: &DestinationItem,
    tx_hash: &str,
) {
    bus.emit(TransferEvent::Success {
        purpose: item.purpose,
        source: PartyRef::from(&batch.source),
        dest: PartyRef::from(item),
        value: item.value,
        coin: batch.coin.clone(),
        context: batch.context.clone(),
        tx_hash: tx_hash.to_string(),
    });
    let op = OperationRecord {
        purpose: item.purpose,
        source_owner: batch.source.owner,
        dest_owner: item.owner,
        dest_address: item.address.clone(),
        value: item.value,
        coin: batch.coin.clone(),
        tx_hash: tx_hash.to_string(),
        chat_id: batch.context.chat_id,
        at: Utc::now(),
    };
    if let Err(e) = db.log_operation(op).await {
        warn!("operation log write failed: {}", e);
    }
}

/// Whole-batch failure: one error event, batch dropped by the caller.
pub(crate) fn emit_batch_error(bus: &EventBus, batch: &Batch, reason: &str) {
    error!(
        "batch {} ({} items, coin {}) failed: {}",
        batch.id,
        batch.items.len(),
        batch.coin,
        reason
    );
    bus.emit(TransferEvent::Error {
        purpose: batch.primary_purpose(),
        chat_id: batch.context.chat_id,
        message_id: batch.context.message_id,
        reason: reason.to_string(),
    });
}
