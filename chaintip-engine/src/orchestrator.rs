//! Front door of the engine. Validates transfer intents synchronously,
//! splits them into bounded batches, and routes each batch to the adapter
//! that owns the coin's platform. Everything after enqueue is asynchronous
//! and reported through the event bus.

use crate::config::EngineConfig;
use crate::error::{EngineError, RegistryError};
use crate::events::EventBus;
use crate::fee::fee_item;
use crate::platform::account::{AccountAdapter, StakerInfo};
use crate::platform::PlatformAdapter;
use crate::queue::IntervalTicker;
use crate::registry::CoinRegistry;
use crate::types::{
    Batch, GeneratedWallet, RoutingContext, SourceWallet, TransferIntent, TransferPurpose,
    DestinationItem, MAX_BATCH_LEN,
};
use log::info;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Balance of the coin that pays network fees for some other coin.
#[derive(Clone, Debug, PartialEq)]
pub struct FeeBalance {
    pub coin: String,
    pub balance: Decimal,
}

pub struct TransferOrchestrator {
    registry: Arc<CoinRegistry>,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    /// The account adapter that fronts the staking contract, when one is
    /// registered. Staking calls are account-model only.
    staking: Option<Arc<AccountAdapter>>,
    bus: Arc<EventBus>,
}

impl TransferOrchestrator {
    pub fn new(registry: Arc<CoinRegistry>, bus: Arc<EventBus>) -> Self {
        TransferOrchestrator {
            registry,
            adapters: HashMap::new(),
            staking: None,
            bus,
        }
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        info!("registered platform adapter: {}", adapter.platform());
        self.adapters
            .insert(adapter.platform().to_string(), adapter);
    }

    /// Registers an account adapter as both a platform and the staking
    /// backend.
    pub fn register_staking(&mut self, adapter: Arc<AccountAdapter>) {
        self.register_adapter(adapter.clone());
        self.staking = Some(adapter);
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<CoinRegistry> {
        &self.registry
    }

    fn adapter_for_coin(&self, coin: &str) -> Result<&Arc<dyn PlatformAdapter>, EngineError> {
        let platform = self.registry.platform_of(coin)?;
        self.adapter_for_platform(platform)
    }

    fn adapter_for_platform(
        &self,
        platform: &str,
    ) -> Result<&Arc<dyn PlatformAdapter>, EngineError> {
        self.adapters
            .get(platform)
            .ok_or_else(|| RegistryError::UnknownPlatform(platform.to_string()).into())
    }

    fn staking_adapter(&self) -> Result<&Arc<AccountAdapter>, EngineError> {
        self.staking
            .as_ref()
            .ok_or_else(|| EngineError::Unsupported("no staking backend registered".into()))
    }

    /// Accepts one transfer intent: validates every destination, appends
    /// the protocol-fee item when a fee is set, splits the result into
    /// batches of at most [`MAX_BATCH_LEN`] items, and enqueues them in
    /// order on the owning platform's queue.
    ///
    /// Returning `Ok` means "accepted for dispatch", not "sent": submission
    /// results arrive later through the event bus.
    pub fn submit(
        &self,
        intent: TransferIntent,
        context: RoutingContext,
    ) -> Result<(), EngineError> {
        let adapter = self.adapter_for_coin(&intent.coin)?;
        let cfg = self.registry.get(&intent.coin)?;

        if intent.destinations.is_empty() {
            return Err(EngineError::Validation("no destinations".into()));
        }
        for item in &intent.destinations {
            if item.value <= Decimal::ZERO {
                return Err(EngineError::Validation(format!(
                    "non-positive amount {} for {}",
                    item.value, item.label
                )));
            }
            if !adapter.check_address(&item.address) {
                return Err(EngineError::Validation(format!(
                    "malformed address {} for {}",
                    item.address, item.label
                )));
            }
        }

        let mut items = intent.destinations;
        match intent.fee {
            Some(fee) if fee > Decimal::ZERO => items.push(fee_item(fee, cfg)),
            _ => {}
        }

        for chunk in items.chunks(MAX_BATCH_LEN) {
            let batch = Batch::new(
                intent.coin.clone(),
                intent.source.clone(),
                chunk.to_vec(),
                context.clone(),
            );
            adapter.enqueue(batch)?;
        }
        Ok(())
    }

    pub async fn get_balance(&self, coin: &str, address: &str) -> Result<Decimal, EngineError> {
        self.adapter_for_coin(coin)?.get_balance(coin, address).await
    }

    pub async fn get_tx_fee(&self, coin: &str) -> Result<Decimal, EngineError> {
        self.adapter_for_coin(coin)?.get_tx_fee(coin).await
    }

    /// Balance of the coin that pays network fees for `coin` — the coin
    /// itself when it is its platform's gas coin.
    pub async fn get_fee_balance(
        &self,
        coin: &str,
        address: &str,
    ) -> Result<FeeBalance, EngineError> {
        let cfg = self.registry.get(coin)?;
        let fee_coin = cfg.fee_coin.clone().unwrap_or_else(|| cfg.code.clone());
        let balance = self.get_balance(&fee_coin, address).await?;
        Ok(FeeBalance {
            coin: fee_coin,
            balance,
        })
    }

    pub fn check_address(&self, coin: &str, address: &str) -> Result<bool, EngineError> {
        Ok(self.adapter_for_coin(coin)?.check_address(address))
    }

    pub fn generate_wallet(&self, platform: &str) -> Result<GeneratedWallet, EngineError> {
        self.adapter_for_platform(platform)?.generate_wallet()
    }

    pub async fn staker(&self, coin: &str, address: &str) -> Result<StakerInfo, EngineError> {
        self.staking_adapter()?.staker(coin, address).await
    }

    pub async fn stake_reward(&self, coin: &str, address: &str) -> Result<Decimal, EngineError> {
        self.staking_adapter()?.stake_reward(coin, address).await
    }

    pub async fn stake_active(&self, coin: &str, address: &str) -> Result<bool, EngineError> {
        self.staking_adapter()?.stake_active(coin, address).await
    }

    /// Opens a staking position by sending `amount` to the coin's staking
    /// contract as an ordinary queued transfer.
    pub fn start_stake(
        &self,
        coin: &str,
        wallet: SourceWallet,
        amount: Decimal,
        context: RoutingContext,
    ) -> Result<(), EngineError> {
        self.staking_adapter()?;
        let cfg = self.registry.get(coin)?;
        let contract = cfg.stake_contract.clone().ok_or_else(|| {
            EngineError::Unsupported(format!("{} has no staking contract", coin))
        })?;
        let intent = TransferIntent {
            source: wallet,
            destinations: vec![DestinationItem {
                label: "staking contract".into(),
                mention: "staking contract".into(),
                address: contract,
                owner: None,
                value: amount,
                purpose: TransferPurpose::Stake,
                aux_ref: None,
            }],
            coin: coin.to_string(),
            fee: None,
        };
        self.submit(intent, context)
    }

    pub async fn claim_stake(
        &self,
        coin: &str,
        wallet: &SourceWallet,
        context: &RoutingContext,
    ) -> Result<(), EngineError> {
        self.staking_adapter()?.claim_stake(coin, wallet, context).await;
        Ok(())
    }

    pub async fn withdraw_stake(
        &self,
        coin: &str,
        wallet: &SourceWallet,
        context: &RoutingContext,
    ) -> Result<(), EngineError> {
        self.staking_adapter()?
            .withdraw_stake(coin, wallet, context)
            .await;
        Ok(())
    }

    /// Explorer link for a transaction on the coin's chain.
    pub fn explorer_link(&self, coin: &str, tx_hash: &str) -> Result<String, EngineError> {
        let cfg = self.registry.get(coin)?;
        Ok(format!("{}{}", cfg.explorer_url, tx_hash))
    }

    /// Starts one dispatch loop per registered adapter. The returned handles
    /// run until dropped or aborted at shutdown.
    pub fn start(&self, config: &EngineConfig) -> Vec<JoinHandle<()>> {
        self.adapters
            .values()
            .map(|adapter| {
                let adapter = adapter.clone();
                let ticker = Box::new(IntervalTicker::new(config.dispatch_interval));
                tokio::spawn(adapter.run(ticker))
            })
            .collect()
    }
}

/// Aborts the dispatch loops and waits for them to wind down. Used by the
/// supervisor after the liveness monitor requests shutdown.
pub async fn stop(handles: Vec<JoinHandle<()>>) {
    for handle in &handles {
        handle.abort();
    }
    futures::future::join_all(handles).await;
}
