use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hard cap on the number of destination items a single underlying
/// transaction group may carry. Backends reject larger groups.
pub const MAX_BATCH_LEN: usize = 100;

// Transaction identifiers as reported by the backends (hex hash or ledger id).
pub type TxId = String;

// Key identifying one pending-work queue for monitoring purposes.
// Account platforms use one key per coin ("ether:ETH"); UTXO and ledger
// platforms use the platform name itself.
pub type QueueKey = String;

pub type BatchId = u64;

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique batch identifier. The liveness monitor compares these
/// to detect a queue head that has stopped moving.
pub fn next_batch_id() -> BatchId {
    NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a transfer leg is for. Drives the post-processing a subscriber runs
/// after the leg confirms (messaging, audit wording, staking bookkeeping).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferPurpose {
    Fee,
    Withdraw,
    Tip,
    Give,
    Rain,
    Pot,
    PotWin,
    Stake,
    Claim,
    Unstake,
    Donate,
}

/// The sending wallet, with its signing key already resolved by the caller.
/// The engine never persists or re-derives the key.
#[derive(Clone, Debug)]
pub struct SourceWallet {
    pub label: String,
    pub mention: String,
    pub address: String,
    pub key: String,
    pub owner: Option<i64>,
}

/// One transfer leg. Value is final and fee-adjusted before the item enters
/// a batch; nothing downstream recomputes it.
#[derive(Clone, Debug, PartialEq)]
pub struct DestinationItem {
    pub label: String,
    pub mention: String,
    pub address: String,
    pub owner: Option<i64>,
    /// Native units, strictly positive.
    pub value: Decimal,
    pub purpose: TransferPurpose,
    pub aux_ref: Option<String>,
}

/// A logical transfer: one source, N destinations, one coin.
/// Built once by the business layer and consumed exactly once by `submit`.
#[derive(Clone, Debug)]
pub struct TransferIntent {
    pub source: SourceWallet,
    pub destinations: Vec<DestinationItem>,
    pub coin: String,
    /// Protocol fee in native units. When set, a fee item aimed at the
    /// coin's fee wallet is appended before batching.
    pub fee: Option<Decimal>,
}

/// Where results for a batch should be routed back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingContext {
    pub chat_id: i64,
    pub message_id: i64,
}

/// An ordered subsequence of destination items bound to one intent,
/// capped at [`MAX_BATCH_LEN`]. Immutable once enqueued.
#[derive(Clone, Debug)]
pub struct Batch {
    pub id: BatchId,
    pub coin: String,
    pub source: SourceWallet,
    pub items: Vec<DestinationItem>,
    pub context: RoutingContext,
}

impl Batch {
    pub fn new(
        coin: String,
        source: SourceWallet,
        items: Vec<DestinationItem>,
        context: RoutingContext,
    ) -> Self {
        debug_assert!(items.len() <= MAX_BATCH_LEN);
        Batch {
            id: next_batch_id(),
            coin,
            source,
            items,
            context,
        }
    }

    pub fn total_value(&self) -> Decimal {
        self.items.iter().map(|i| i.value).sum()
    }

    /// The purpose used when reporting a whole-batch error: the first
    /// non-fee item's purpose, or `Fee` for a fee-only batch.
    pub fn primary_purpose(&self) -> TransferPurpose {
        self.items
            .iter()
            .map(|i| i.purpose)
            .find(|p| *p != TransferPurpose::Fee)
            .unwrap_or(TransferPurpose::Fee)
    }
}

/// A freshly generated address/key pair. The key is handed back in the
/// clear; the caller owns persistence and encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedWallet {
    pub address: String,
    pub key: String,
}

/// Converts a native-unit amount to backend base units (wei, satoshi, ...).
/// Returns `None` on overflow or a negative amount.
pub fn to_base_units(value: Decimal, decimals: u32) -> Option<u128> {
    if value.is_sign_negative() {
        return None;
    }
    let scale = Decimal::from(10u64.checked_pow(decimals)?);
    value.checked_mul(scale)?.trunc().to_u128()
}

/// Converts backend base units back to native units.
pub fn from_base_units(units: u128, decimals: u32) -> Option<Decimal> {
    let units = i128::try_from(units).ok()?;
    Decimal::try_from_i128_with_scale(units, decimals).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn item(value: &str, purpose: TransferPurpose) -> DestinationItem {
        DestinationItem {
            label: "alice".into(),
            mention: "@alice".into(),
            address: "0x0000000000000000000000000000000000000001".into(),
            owner: Some(1),
            value: Decimal::from_str(value).unwrap(),
            purpose,
            aux_ref: None,
        }
    }

    fn source() -> SourceWallet {
        SourceWallet {
            label: "bob".into(),
            mention: "@bob".into(),
            address: "0x0000000000000000000000000000000000000002".into(),
            key: "aa".repeat(32),
            owner: Some(2),
        }
    }

    #[test]
    fn batch_ids_are_unique_and_increasing() {
        let a = next_batch_id();
        let b = next_batch_id();
        assert!(b > a);
    }

    #[test]
    fn batch_total_and_primary_purpose() {
        let batch = Batch::new(
            "ETH".into(),
            source(),
            vec![
                item("0.01", TransferPurpose::Fee),
                item("1.5", TransferPurpose::Tip),
                item("2.5", TransferPurpose::Tip),
            ],
            RoutingContext {
                chat_id: 7,
                message_id: 9,
            },
        );
        assert_eq!(batch.total_value(), Decimal::from_str("4.01").unwrap());
        assert_eq!(batch.primary_purpose(), TransferPurpose::Tip);
    }

    #[test]
    fn fee_only_batch_reports_fee_purpose() {
        let batch = Batch::new(
            "ETH".into(),
            source(),
            vec![item("0.01", TransferPurpose::Fee)],
            RoutingContext {
                chat_id: 1,
                message_id: 1,
            },
        );
        assert_eq!(batch.primary_purpose(), TransferPurpose::Fee);
    }

    #[test]
    fn base_unit_round_trip() {
        let v = Decimal::from_str("1.23456789").unwrap();
        let sats = to_base_units(v, 8).unwrap();
        assert_eq!(sats, 123_456_789);
        assert_eq!(from_base_units(sats, 8).unwrap(), v);
    }

    #[test]
    fn base_units_truncate_excess_precision() {
        let v = Decimal::from_str("0.123456789").unwrap();
        // 8 decimals: the ninth digit is dropped, not rounded up.
        assert_eq!(to_base_units(v, 8).unwrap(), 12_345_678);
    }

    #[test]
    fn negative_values_do_not_convert() {
        assert_eq!(to_base_units(Decimal::from(-1), 8), None);
    }
}
