//! In-memory stand-ins for the engine's collaborators: node clients, the
//! database seam, an event recorder, and a hand-driven tick source. Used by
//! the test suites and handy for wiring demo setups without live nodes.

use crate::audit::{Database, OperationRecord, WalletRecord};
use crate::error::NodeError;
use crate::events::{EventSubscriber, TransferEvent};
use crate::node::{AccountNode, AccountTx, LedgerNode, LedgerOutput, Utxo, UtxoNode};
use crate::queue::TickSource;
use crate::registry::CoinRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

fn rejection() -> NodeError {
    "node rejected transaction".into()
}

/// Account-model node with scripted balances and a submission log.
#[derive(Default)]
pub struct MockAccountNode {
    start_nonce: u64,
    gas_price: Mutex<u128>,
    balances: Mutex<HashMap<String, u128>>,
    token_balances: Mutex<HashMap<(String, String), u128>>,
    submitted: Mutex<Vec<AccountTx>>,
    calls: Mutex<Vec<(String, Vec<u8>)>>,
    call_response: Mutex<Vec<u8>>,
    fail: AtomicBool,
    counter: AtomicU64,
}

impl MockAccountNode {
    pub fn new(start_nonce: u64) -> Self {
        MockAccountNode {
            start_nonce,
            gas_price: Mutex::new(1_000),
            // Two zero words: a staker with no position.
            call_response: Mutex::new(vec![0u8; 64]),
            ..MockAccountNode::default()
        }
    }

    pub fn set_balance(&self, address: &str, units: u128) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), units);
    }

    pub fn set_token_balance(&self, contract: &str, address: &str, units: u128) {
        self.token_balances
            .lock()
            .unwrap()
            .insert((contract.to_string(), address.to_string()), units);
    }

    pub fn set_gas_price(&self, price: u128) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn set_call_response(&self, output: Vec<u8>) {
        *self.call_response.lock().unwrap() = output;
    }

    /// When set, every `submit` is rejected.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<AccountTx> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountNode for MockAccountNode {
    async fn balance(&self, address: &str) -> Result<u128, NodeError> {
        Ok(*self.balances.lock().unwrap().get(address).unwrap_or(&0))
    }

    async fn token_balance(&self, contract: &str, address: &str) -> Result<u128, NodeError> {
        Ok(*self
            .token_balances
            .lock()
            .unwrap()
            .get(&(contract.to_string(), address.to_string()))
            .unwrap_or(&0))
    }

    async fn gas_price(&self) -> Result<u128, NodeError> {
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn next_nonce(&self, _address: &str) -> Result<u64, NodeError> {
        Ok(self.start_nonce)
    }

    async fn submit(&self, tx: AccountTx) -> Result<String, NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(rejection());
        }
        self.submitted.lock().unwrap().push(tx);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0x{:064x}", n + 1))
    }

    async fn call(&self, contract: &str, data: Vec<u8>) -> Result<Vec<u8>, NodeError> {
        self.calls
            .lock()
            .unwrap()
            .push((contract.to_string(), data));
        Ok(self.call_response.lock().unwrap().clone())
    }
}

/// UTXO node with a fixed unspent set and a broadcast log.
pub struct MockUtxoNode {
    utxos: Mutex<Vec<Utxo>>,
    fee_rate: u64,
    broadcasts: Mutex<Vec<String>>,
    fail: AtomicBool,
    counter: AtomicU64,
}

impl MockUtxoNode {
    pub fn new(utxos: Vec<Utxo>, fee_rate: u64) -> Self {
        MockUtxoNode {
            utxos: Mutex::new(utxos),
            fee_rate,
            broadcasts: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_utxos(&self, utxos: Vec<Utxo>) {
        *self.utxos.lock().unwrap() = utxos;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UtxoNode for MockUtxoNode {
    async fn balance(&self, _address: &str) -> Result<u64, NodeError> {
        Ok(self.utxos.lock().unwrap().iter().map(|u| u.value).sum())
    }

    async fn list_unspent(&self, _address: &str) -> Result<Vec<Utxo>, NodeError> {
        Ok(self.utxos.lock().unwrap().clone())
    }

    async fn fee_rate(&self) -> Result<u64, NodeError> {
        Ok(self.fee_rate)
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(rejection());
        }
        self.broadcasts.lock().unwrap().push(raw_hex.to_string());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{:064x}", n + 1))
    }
}

/// Ledger node with a switchable multi-send capability and a transfer log.
pub struct MockLedgerNode {
    multi: bool,
    fee: u128,
    balances: Mutex<HashMap<(String, String), u128>>,
    sent: Mutex<Vec<(String, Vec<LedgerOutput>)>>,
    fail: AtomicBool,
    counter: AtomicU64,
}

impl MockLedgerNode {
    pub fn new(multi: bool) -> Self {
        MockLedgerNode {
            multi,
            fee: 100,
            balances: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_balance(&self, denom: &str, address: &str, units: u128) {
        self.balances
            .lock()
            .unwrap()
            .insert((denom.to_string(), address.to_string()), units);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every accepted transfer, one entry per underlying transaction.
    pub fn sent(&self) -> Vec<(String, Vec<LedgerOutput>)> {
        self.sent.lock().unwrap().clone()
    }

    fn accept(&self, from_key: &str, outputs: Vec<LedgerOutput>) -> Result<String, NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(rejection());
        }
        self.sent
            .lock()
            .unwrap()
            .push((from_key.to_string(), outputs));
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{:064x}", n + 1))
    }
}

#[async_trait]
impl LedgerNode for MockLedgerNode {
    async fn balance(&self, denom: &str, address: &str) -> Result<u128, NodeError> {
        Ok(*self
            .balances
            .lock()
            .unwrap()
            .get(&(denom.to_string(), address.to_string()))
            .unwrap_or(&0))
    }

    async fn transfer_fee(&self) -> Result<u128, NodeError> {
        Ok(self.fee)
    }

    fn supports_multi_send(&self) -> bool {
        self.multi
    }

    async fn multi_send(
        &self,
        from_key: &str,
        outputs: &[LedgerOutput],
    ) -> Result<String, NodeError> {
        self.accept(from_key, outputs.to_vec())
    }

    async fn send(&self, from_key: &str, output: &LedgerOutput) -> Result<String, NodeError> {
        self.accept(from_key, vec![output.clone()])
    }
}

/// In-memory database seam.
#[derive(Default)]
pub struct MemoryDatabase {
    wallets: Mutex<HashMap<(i64, String), WalletRecord>>,
    operations: Mutex<Vec<OperationRecord>>,
    fail: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        MemoryDatabase::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn wallet_record(
        &self,
        owner: i64,
        platform: &str,
    ) -> Result<Option<WalletRecord>, NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("database unavailable".into());
        }
        Ok(self
            .wallets
            .lock()
            .unwrap()
            .get(&(owner, platform.to_string()))
            .cloned())
    }

    async fn put_wallet_record(&self, owner: i64, record: WalletRecord) -> Result<(), NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("database unavailable".into());
        }
        self.wallets
            .lock()
            .unwrap()
            .insert((owner, record.platform.clone()), record);
        Ok(())
    }

    async fn log_operation(&self, op: OperationRecord) -> Result<(), NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("database unavailable".into());
        }
        self.operations.lock().unwrap().push(op);
        Ok(())
    }
}

/// Subscriber that keeps every event it sees, in delivery order.
pub struct RecordingSubscriber {
    name: String,
    events: Mutex<Vec<TransferEvent>>,
}

impl RecordingSubscriber {
    pub fn new(name: &str) -> Self {
        RecordingSubscriber {
            name: name.to_string(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &TransferEvent) -> Result<(), NodeError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Tick source driven by the test, one tick per message.
pub struct ManualTicker {
    ticks: mpsc::UnboundedReceiver<()>,
}

/// Returns the driver handle and a boxed ticker to hand to a loop.
pub fn manual_ticker() -> (mpsc::UnboundedSender<()>, Box<ManualTicker>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Box::new(ManualTicker { ticks: rx }))
}

#[async_trait]
impl TickSource for ManualTicker {
    async fn tick(&mut self) {
        if self.ticks.recv().await.is_none() {
            // Driver dropped: park forever instead of spinning the loop.
            std::future::pending::<()>().await;
        }
    }
}

/// A small coin table spanning all three platform models.
pub fn test_registry() -> CoinRegistry {
    CoinRegistry::load(
        r#"{
            "ETH": {
                "platform": "ether",
                "decimals": 18,
                "min_value": "0.01",
                "gas_hint": 21000,
                "fee_wallet": "0x00000000000000000000000000000000000000fe",
                "stake_contract": "0x00000000000000000000000000000000000000cc",
                "endpoint": "http://localhost:8545",
                "explorer_url": "https://explorer.example/eth/tx/"
            },
            "TIP": {
                "platform": "ether",
                "decimals": 8,
                "min_value": "1",
                "fee_wallet": "0x00000000000000000000000000000000000000fe",
                "fee_coin": "ETH",
                "contract": "0x00000000000000000000000000000000000000aa",
                "token_kind": "erc20",
                "endpoint": "http://localhost:8545",
                "explorer_url": "https://explorer.example/eth/tx/"
            },
            "BTC": {
                "platform": "bitcoin",
                "decimals": 8,
                "min_value": "0.0001",
                "fee_wallet": "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
                "endpoint": "http://localhost:9130",
                "explorer_url": "https://explorer.example/btc/tx/"
            },
            "LDG": {
                "platform": "ledger",
                "decimals": 6,
                "min_value": "0.1",
                "fee_wallet": "tip1abababababababababababababababababababab",
                "endpoint": "http://localhost:1317",
                "explorer_url": "https://explorer.example/ldg/tx/"
            }
        }"#,
    )
    .expect("static test coin table")
}
