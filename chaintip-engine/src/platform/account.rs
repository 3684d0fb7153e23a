//! Account-model adapter: nonce-sequenced chains with optional
//! smart-contract token transfers and a staking contract.

use crate::audit::Database;
use crate::error::{EngineError, NodeError, RegistryError};
use crate::events::{EventBus, PartyRef, TransferEvent};
use crate::node::evm::{contract_call_data, decode_word, erc20_transfer_data, u256_to_u128};
use crate::node::{AccountNode, AccountTx};
use crate::platform::{emit_batch_error, record_leg, PlatformAdapter};
use crate::queue::TxQueue;
use crate::registry::{CoinConfig, CoinRegistry, TokenKind};
use crate::types::{
    from_base_units, to_base_units, Batch, BatchId, GeneratedWallet, QueueKey, RoutingContext,
    SourceWallet, TransferPurpose,
};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use log::{debug, warn};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

// Gas limits by transfer shape. Contract transfers pay for token
// bookkeeping; staking calls pay for the contract's reward accounting.
const NATIVE_GAS: u64 = 21_000;
const TOKEN_GAS: u64 = 150_000;
const STAKE_GAS: u64 = 500_000;

/// Staking position as reported by the staking contract.
#[derive(Clone, Debug, PartialEq)]
pub struct StakerInfo {
    /// Staked amount in native units.
    pub amount: Decimal,
    /// Unix timestamp the stake started at.
    pub since: u64,
}

pub struct AccountAdapter {
    platform: String,
    registry: Arc<CoinRegistry>,
    node: Arc<dyn AccountNode>,
    bus: Arc<EventBus>,
    db: Arc<dyn Database>,
    /// One FIFO queue per owned coin; fixed key set after construction.
    queues: BTreeMap<String, TxQueue>,
    /// Last allocated nonce per (coin, sender address). Seeded from the
    /// chain on first use, then strictly increasing for the process
    /// lifetime. The lock is held across seeding so two concurrent
    /// allocations can never observe the same value.
    nonces: Mutex<HashMap<(String, String), u64>>,
    address_re: Regex,
}

impl AccountAdapter {
    pub fn new(
        platform: &str,
        registry: Arc<CoinRegistry>,
        node: Arc<dyn AccountNode>,
        bus: Arc<EventBus>,
        db: Arc<dyn Database>,
    ) -> Self {
        let queues = registry
            .codes_for(platform)
            .into_iter()
            .map(|code| (code, TxQueue::new()))
            .collect();
        AccountAdapter {
            platform: platform.to_string(),
            registry,
            node,
            bus,
            db,
            queues,
            nonces: Mutex::new(HashMap::new()),
            address_re: Regex::new("^0x[0-9a-fA-F]{40}$").expect("static regex"),
        }
    }

    fn queue_key(&self, coin: &str) -> QueueKey {
        format!("{}:{}", self.platform, coin)
    }

    /// Allocates the next nonce for (coin, sender). Never repeats, never
    /// regresses; the first allocation takes the chain's pending count.
    async fn allocate_nonce(&self, coin: &str, address: &str) -> Result<u64, NodeError> {
        let mut nonces = self.nonces.lock().await;
        let key = (coin.to_string(), address.to_string());
        match nonces.get_mut(&key) {
            Some(last) => {
                *last += 1;
                Ok(*last)
            }
            None => {
                let seed = self.node.next_nonce(address).await?;
                nonces.insert(key, seed);
                Ok(seed)
            }
        }
    }

    fn build_tx(
        &self,
        cfg: &CoinConfig,
        source: &SourceWallet,
        to: &str,
        value: Decimal,
        purpose: TransferPurpose,
        gas_price: u128,
        nonce: u64,
    ) -> Result<AccountTx, NodeError> {
        let amount = to_base_units(value, cfg.decimals)
            .ok_or_else(|| format!("value {} out of range for {}", value, cfg.code))?;
        let tx = match cfg.token_kind {
            Some(TokenKind::Erc20) => {
                let contract = cfg
                    .contract
                    .as_deref()
                    .ok_or("token coin without contract")?;
                AccountTx {
                    from_key: source.key.clone(),
                    to: contract.to_string(),
                    value: 0,
                    data: Some(erc20_transfer_data(to, amount)?),
                    gas_limit: TOKEN_GAS,
                    gas_price,
                    nonce,
                }
            }
            _ => AccountTx {
                from_key: source.key.clone(),
                to: to.to_string(),
                value: amount,
                data: None,
                gas_limit: if purpose == TransferPurpose::Stake {
                    STAKE_GAS
                } else {
                    cfg.gas_hint.unwrap_or(NATIVE_GAS)
                },
                gas_price,
                nonce,
            },
        };
        Ok(tx)
    }

    /// Submits every leg of the batch under consecutive nonces without
    /// waiting for prior confirmations; a slow block does not stall the
    /// rest of the batch. A leg failure aborts the remainder — the caller
    /// gets one error for the whole logical request.
    async fn submit_batch(&self, cfg: &CoinConfig, batch: &Batch) -> Result<(), NodeError> {
        let gas_price = self.node.gas_price().await?;
        for item in &batch.items {
            let nonce = self.allocate_nonce(&cfg.code, &batch.source.address).await?;
            let tx = self.build_tx(
                cfg,
                &batch.source,
                &item.address,
                item.value,
                item.purpose,
                gas_price,
                nonce,
            )?;
            let hash = self.node.submit(tx).await?;
            record_leg(&self.bus, self.db.as_ref(), batch, item, &hash).await;
        }
        Ok(())
    }

    fn stake_contract<'a>(&self, cfg: &'a CoinConfig) -> Result<&'a str, EngineError> {
        cfg.stake_contract
            .as_deref()
            .ok_or_else(|| EngineError::Unsupported(format!("{} has no staking contract", cfg.code)))
    }

    fn parse_address(address: &str) -> Result<Address, EngineError> {
        address
            .parse::<Address>()
            .map_err(|e| EngineError::Validation(format!("bad address {}: {}", address, e)))
    }

    /// Current staking position for an address.
    pub async fn staker(&self, coin: &str, address: &str) -> Result<StakerInfo, EngineError> {
        let cfg = self.registry.get(coin)?;
        let contract = self.stake_contract(cfg)?;
        let data = contract_call_data("staker(address)", &[Token::Address(Self::parse_address(address)?)]);
        let output = self
            .node
            .call(contract, data)
            .await
            .map_err(EngineError::rpc)?;
        let amount = u256_to_u128(decode_word(&output, 0).map_err(EngineError::rpc)?)
            .map_err(EngineError::rpc)?;
        let since = decode_word(&output, 1).map_err(EngineError::rpc)?.as_u64();
        let amount = from_base_units(amount, cfg.decimals)
            .ok_or_else(|| EngineError::Rpc("stake amount out of range".into()))?;
        Ok(StakerInfo { amount, since })
    }

    /// Pending staking reward for an address, in native units.
    pub async fn stake_reward(&self, coin: &str, address: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let contract = self.stake_contract(cfg)?;
        let data = contract_call_data(
            "stake_reward(address)",
            &[Token::Address(Self::parse_address(address)?)],
        );
        let output = self
            .node
            .call(contract, data)
            .await
            .map_err(EngineError::rpc)?;
        let reward = u256_to_u128(decode_word(&output, 0).map_err(EngineError::rpc)?)
            .map_err(EngineError::rpc)?;
        from_base_units(reward, cfg.decimals)
            .ok_or_else(|| EngineError::Rpc("stake reward out of range".into()))
    }

    pub async fn stake_active(&self, coin: &str, address: &str) -> Result<bool, EngineError> {
        Ok(self.staker(coin, address).await?.amount > Decimal::ZERO)
    }

    async fn stake_call(
        &self,
        coin: &str,
        wallet: &SourceWallet,
        ctx: &RoutingContext,
        signature: &str,
        purpose: TransferPurpose,
    ) {
        let result = self.try_stake_call(coin, wallet, signature).await;
        match result {
            Ok((contract, hash)) => {
                self.bus.emit(TransferEvent::Success {
                    purpose,
                    source: PartyRef::from(wallet),
                    dest: PartyRef {
                        label: "staking contract".to_string(),
                        mention: "staking contract".to_string(),
                        address: contract,
                        owner: None,
                    },
                    value: Decimal::ZERO,
                    coin: coin.to_string(),
                    context: ctx.clone(),
                    tx_hash: hash,
                });
            }
            Err(e) => {
                warn!("stake call {} for {} failed: {}", signature, coin, e);
                self.bus.emit(TransferEvent::Error {
                    purpose,
                    chat_id: ctx.chat_id,
                    message_id: ctx.message_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn try_stake_call(
        &self,
        coin: &str,
        wallet: &SourceWallet,
        signature: &str,
    ) -> Result<(String, String), EngineError> {
        let cfg = self.registry.get(coin)?;
        let contract = self.stake_contract(cfg)?.to_string();
        let gas_price = self.node.gas_price().await.map_err(EngineError::rpc)?;
        let nonce = self
            .allocate_nonce(coin, &wallet.address)
            .await
            .map_err(EngineError::rpc)?;
        let tx = AccountTx {
            from_key: wallet.key.clone(),
            to: contract.clone(),
            value: 0,
            data: Some(contract_call_data(signature, &[])),
            gas_limit: STAKE_GAS,
            gas_price,
            nonce,
        };
        let hash = self.node.submit(tx).await.map_err(EngineError::submission)?;
        Ok((contract, hash))
    }

    /// Claims the accumulated staking reward. Reports through the bus.
    pub async fn claim_stake(&self, coin: &str, wallet: &SourceWallet, ctx: &RoutingContext) {
        self.stake_call(coin, wallet, ctx, "claim()", TransferPurpose::Claim)
            .await;
    }

    /// Ends the stake and withdraws principal plus reward.
    pub async fn withdraw_stake(&self, coin: &str, wallet: &SourceWallet, ctx: &RoutingContext) {
        self.stake_call(coin, wallet, ctx, "withdraw()", TransferPurpose::Unstake)
            .await;
    }
}

#[async_trait]
impl PlatformAdapter for AccountAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn get_balance(&self, coin: &str, address: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let units = match (&cfg.token_kind, &cfg.contract) {
            (Some(TokenKind::Erc20), Some(contract)) => self
                .node
                .token_balance(contract, address)
                .await
                .map_err(EngineError::rpc)?,
            _ => self.node.balance(address).await.map_err(EngineError::rpc)?,
        };
        from_base_units(units, cfg.decimals)
            .ok_or_else(|| EngineError::Rpc("balance out of range".into()))
    }

    async fn get_tx_fee(&self, coin: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let gas_price = self.node.gas_price().await.map_err(EngineError::rpc)?;
        let gas_limit = match cfg.token_kind {
            Some(TokenKind::Erc20) => TOKEN_GAS,
            _ => cfg.gas_hint.unwrap_or(NATIVE_GAS),
        };
        // Fees are paid in the platform's gas coin; use its precision.
        let fee_decimals = match &cfg.fee_coin {
            Some(fee_coin) => self.registry.get(fee_coin)?.decimals,
            None => cfg.decimals,
        };
        from_base_units(gas_price.saturating_mul(gas_limit as u128), fee_decimals)
            .ok_or_else(|| EngineError::Rpc("fee out of range".into()))
    }

    fn check_address(&self, address: &str) -> bool {
        self.address_re.is_match(address)
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, EngineError> {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        Ok(GeneratedWallet {
            address: format!("{:#x}", wallet.address()),
            key: hex::encode(wallet.signer().to_bytes()),
        })
    }

    fn enqueue(&self, batch: Batch) -> Result<(), EngineError> {
        let queue = self
            .queues
            .get(&batch.coin)
            .ok_or_else(|| RegistryError::UnknownCoin(batch.coin.clone()))?;
        debug!(
            "enqueue batch {} ({} items) on {}",
            batch.id,
            batch.items.len(),
            self.queue_key(&batch.coin)
        );
        queue.push(batch);
        Ok(())
    }

    fn queue_heads(&self) -> Vec<(QueueKey, Option<BatchId>)> {
        self.queues
            .iter()
            .map(|(coin, queue)| (self.queue_key(coin), queue.head_id()))
            .collect()
    }

    async fn dispatch_once(&self) {
        for (coin, queue) in &self.queues {
            let Some(batch) = queue.begin() else { continue };
            let Ok(cfg) = self.registry.get(coin) else {
                queue.complete(batch.id, false);
                continue;
            };
            match self.submit_batch(cfg, &batch).await {
                Ok(()) => queue.complete(batch.id, true),
                Err(e) => {
                    emit_batch_error(&self.bus, &batch, &e.to_string());
                    queue.complete(batch.id, false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{test_registry, MemoryDatabase, MockAccountNode};
    use std::str::FromStr;

    fn adapter() -> (Arc<AccountAdapter>, Arc<MockAccountNode>) {
        let registry = Arc::new(test_registry());
        let node = Arc::new(MockAccountNode::new(7));
        let adapter = Arc::new(AccountAdapter::new(
            "ether",
            registry,
            node.clone(),
            Arc::new(EventBus::new()),
            Arc::new(MemoryDatabase::new()),
        ));
        (adapter, node)
    }

    #[tokio::test]
    async fn nonce_allocation_is_gapless_and_seeded_from_chain() {
        let (adapter, _node) = adapter();
        let a = adapter.allocate_nonce("ETH", "0xabc").await.unwrap();
        let b = adapter.allocate_nonce("ETH", "0xabc").await.unwrap();
        let c = adapter.allocate_nonce("ETH", "0xabc").await.unwrap();
        assert_eq!((a, b, c), (7, 8, 9));
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let (adapter, _node) = adapter();
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let adapter = adapter.clone();
            tasks.push(tokio::spawn(async move {
                adapter.allocate_nonce("ETH", "0xabc").await.unwrap()
            }));
        }
        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap());
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn nonces_are_tracked_per_sender() {
        let (adapter, _node) = adapter();
        let a = adapter.allocate_nonce("ETH", "0xaaa").await.unwrap();
        let b = adapter.allocate_nonce("ETH", "0xbbb").await.unwrap();
        assert_eq!((a, b), (7, 7));
    }

    #[test]
    fn address_format_check() {
        let (adapter, _node) = adapter();
        assert!(adapter.check_address("0x00000000000000000000000000000000000000aa"));
        assert!(!adapter.check_address("0x123"));
        assert!(!adapter.check_address("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"));
    }

    #[test]
    fn generated_wallets_are_distinct_and_well_formed() {
        let (adapter, _node) = adapter();
        let w1 = adapter.generate_wallet().unwrap();
        let w2 = adapter.generate_wallet().unwrap();
        assert_ne!(w1.key, w2.key);
        assert_ne!(w1.address, w2.address);
        assert!(adapter.check_address(&w1.address));
        assert!(adapter.check_address(&w2.address));
    }

    #[test]
    fn token_transfer_targets_the_contract() {
        let (adapter, _node) = adapter();
        let registry = test_registry();
        let cfg = registry.get("TIP").unwrap();
        let source = SourceWallet {
            label: "src".into(),
            mention: "@src".into(),
            address: "0x0000000000000000000000000000000000000002".into(),
            key: "aa".repeat(32),
            owner: None,
        };
        let tx = adapter
            .build_tx(
                cfg,
                &source,
                "0x0000000000000000000000000000000000000003",
                Decimal::from_str("2.5").unwrap(),
                TransferPurpose::Tip,
                1_000,
                0,
            )
            .unwrap();
        assert_eq!(tx.to, cfg.contract.clone().unwrap());
        assert_eq!(tx.value, 0);
        assert!(tx.data.is_some());
        assert_eq!(tx.gas_limit, TOKEN_GAS);
    }

    #[test]
    fn stake_transfer_uses_stake_gas() {
        let (adapter, _node) = adapter();
        let registry = test_registry();
        let cfg = registry.get("ETH").unwrap();
        let source = SourceWallet {
            label: "src".into(),
            mention: "@src".into(),
            address: "0x0000000000000000000000000000000000000002".into(),
            key: "aa".repeat(32),
            owner: None,
        };
        let tx = adapter
            .build_tx(
                cfg,
                &source,
                "0x00000000000000000000000000000000000000cc",
                Decimal::ONE,
                TransferPurpose::Stake,
                1_000,
                0,
            )
            .unwrap();
        assert_eq!(tx.gas_limit, STAKE_GAS);
        assert!(tx.data.is_none());
    }
}
