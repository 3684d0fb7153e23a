//! Database collaborator seam. The engine consumes simple record CRUD and
//! an append-only operation log; persistence failures are logged by the
//! caller and never fatal to dispatch.

use crate::error::NodeError;
use crate::types::{TransferPurpose, TxId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// One user's wallet on one platform. Structured on purpose: no
/// string-keyed field access on a generic user record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletRecord {
    pub platform: String,
    pub address: String,
    /// Stored form is the caller's concern (usually encrypted); the engine
    /// treats it as opaque.
    pub key: String,
}

/// Append-only audit entry, written once per confirmed transfer leg.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationRecord {
    pub purpose: TransferPurpose,
    pub source_owner: Option<i64>,
    pub dest_owner: Option<i64>,
    pub dest_address: String,
    pub value: Decimal,
    pub coin: String,
    pub tx_hash: TxId,
    pub chat_id: i64,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn wallet_record(
        &self,
        owner: i64,
        platform: &str,
    ) -> Result<Option<WalletRecord>, NodeError>;

    async fn put_wallet_record(&self, owner: i64, record: WalletRecord) -> Result<(), NodeError>;

    /// Appends one audit entry. Callers log and swallow failures.
    async fn log_operation(&self, op: OperationRecord) -> Result<(), NodeError>;
}
