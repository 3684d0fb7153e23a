//! Network-client traits, one per transaction model. Adapters talk to these
//! instead of concrete RPC stacks so the dispatch pipeline can be exercised
//! against mocks and pointed at real nodes without changing shape.

pub mod blockbook;
pub mod evm;
pub mod ledger_rest;

use crate::error::NodeError;
use crate::types::TxId;
use async_trait::async_trait;

/// A transaction ready for an account-model chain. Amounts are base units
/// (wei-scale); the nonce has already been allocated by the adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountTx {
    pub from_key: String,
    pub to: String,
    pub value: u128,
    /// Contract call payload; `None` for a plain native transfer.
    pub data: Option<Vec<u8>>,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub nonce: u64,
}

/// Node client for nonce-sequenced account chains.
///
/// `submit` returns once the node has accepted the transaction into its
/// pool, not once it is mined — that is what makes nonce pipelining work.
#[async_trait]
pub trait AccountNode: Send + Sync {
    async fn balance(&self, address: &str) -> Result<u128, NodeError>;

    async fn token_balance(&self, contract: &str, address: &str) -> Result<u128, NodeError>;

    async fn gas_price(&self) -> Result<u128, NodeError>;

    /// The chain's view of the sender's next nonce; used only to seed the
    /// in-process counter.
    async fn next_nonce(&self, address: &str) -> Result<u64, NodeError>;

    async fn submit(&self, tx: AccountTx) -> Result<TxId, NodeError>;

    /// Read-only contract call; returns the raw ABI-encoded words.
    async fn call(&self, contract: &str, data: Vec<u8>) -> Result<Vec<u8>, NodeError>;
}

/// One unspent output as reported by the index backend. Value in satoshi.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

/// Node/index client for unspent-output chains.
#[async_trait]
pub trait UtxoNode: Send + Sync {
    async fn balance(&self, address: &str) -> Result<u64, NodeError>;

    async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, NodeError>;

    /// Current fee rate in satoshi per virtual byte.
    async fn fee_rate(&self) -> Result<u64, NodeError>;

    /// Broadcasts a raw transaction (hex) and returns the accepted txid.
    async fn broadcast(&self, raw_hex: &str) -> Result<TxId, NodeError>;
}

/// One output of a ledger-model transfer. Amount in the asset's base units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerOutput {
    pub to: String,
    pub amount: u128,
    pub denom: String,
}

/// Node client for ledger-style chains with native transfers.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    async fn balance(&self, denom: &str, address: &str) -> Result<u128, NodeError>;

    /// Flat per-transfer fee in base units of the native coin.
    async fn transfer_fee(&self) -> Result<u128, NodeError>;

    /// Whether the backend accepts one transaction fanning out to many
    /// outputs. When false the adapter falls back to one send per output.
    fn supports_multi_send(&self) -> bool;

    async fn multi_send(&self, from_key: &str, outputs: &[LedgerOutput])
        -> Result<TxId, NodeError>;

    async fn send(&self, from_key: &str, output: &LedgerOutput) -> Result<TxId, NodeError>;
}
