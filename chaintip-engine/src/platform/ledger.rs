//! Ledger-model adapter: balance-entry chains with named assets and,
//! where the backend supports it, native multi-output transfers.

use crate::audit::Database;
use crate::error::{EngineError, NodeError};
use crate::events::EventBus;
use crate::node::{LedgerNode, LedgerOutput};
use crate::platform::{emit_batch_error, record_leg, PlatformAdapter};
use crate::queue::TxQueue;
use crate::registry::{CoinConfig, CoinRegistry};
use crate::types::{from_base_units, to_base_units, Batch, BatchId, GeneratedWallet, QueueKey};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use log::debug;
use rand::rngs::OsRng;
use regex::Regex;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub struct LedgerAdapter {
    platform: String,
    /// Bech32-style human-readable prefix for addresses on this chain.
    address_prefix: String,
    registry: Arc<CoinRegistry>,
    node: Arc<dyn LedgerNode>,
    bus: Arc<EventBus>,
    db: Arc<dyn Database>,
    queue: TxQueue,
    address_re: Regex,
}

impl LedgerAdapter {
    pub fn new(
        platform: &str,
        address_prefix: &str,
        registry: Arc<CoinRegistry>,
        node: Arc<dyn LedgerNode>,
        bus: Arc<EventBus>,
        db: Arc<dyn Database>,
    ) -> Result<Self, EngineError> {
        let address_re = Regex::new(&format!("^{}1[0-9a-f]{{40}}$", regex::escape(address_prefix)))
            .map_err(|e| EngineError::Validation(format!("bad address prefix: {}", e)))?;
        Ok(LedgerAdapter {
            platform: platform.to_string(),
            address_prefix: address_prefix.to_string(),
            registry,
            node,
            bus,
            db,
            queue: TxQueue::new(),
            address_re,
        })
    }

    /// The on-ledger denom for a coin: its asset name when set, else the
    /// coin code itself (the chain's native denom).
    fn denom(cfg: &CoinConfig) -> &str {
        cfg.contract.as_deref().unwrap_or(&cfg.code)
    }

    fn plan_outputs(&self, batch: &Batch) -> Result<Vec<LedgerOutput>, NodeError> {
        let cfg = self.registry.get(&batch.coin)?;
        let denom = Self::denom(cfg);
        batch
            .items
            .iter()
            .map(|item| {
                let amount = to_base_units(item.value, cfg.decimals)
                    .ok_or_else(|| format!("value {} out of range", item.value))?;
                Ok(LedgerOutput {
                    to: item.address.clone(),
                    amount,
                    denom: denom.to_string(),
                })
            })
            .collect()
    }

    /// With multi-send the batch lands as one ledger transaction and every
    /// leg shares its hash; otherwise each leg is its own transfer and a
    /// mid-batch failure aborts the remainder.
    async fn submit_batch(&self, batch: &Batch) -> Result<(), NodeError> {
        let outputs = self.plan_outputs(batch)?;
        if self.node.supports_multi_send() && outputs.len() > 1 {
            let hash = self.node.multi_send(&batch.source.key, &outputs).await?;
            debug!("batch {}: multi-send of {} outputs", batch.id, outputs.len());
            for item in &batch.items {
                record_leg(&self.bus, self.db.as_ref(), batch, item, &hash).await;
            }
        } else {
            for (item, output) in batch.items.iter().zip(&outputs) {
                let hash = self.node.send(&batch.source.key, output).await?;
                record_leg(&self.bus, self.db.as_ref(), batch, item, &hash).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for LedgerAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn get_balance(&self, coin: &str, address: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let units = self
            .node
            .balance(Self::denom(cfg), address)
            .await
            .map_err(EngineError::rpc)?;
        from_base_units(units, cfg.decimals)
            .ok_or_else(|| EngineError::Rpc("balance out of range".into()))
    }

    async fn get_tx_fee(&self, coin: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let fee = self.node.transfer_fee().await.map_err(EngineError::rpc)?;
        // The fixed fee is always charged in the native denom; use the
        // fee coin's precision when one is configured.
        let fee_decimals = match &cfg.fee_coin {
            Some(fee_coin) => self.registry.get(fee_coin)?.decimals,
            None => cfg.decimals,
        };
        from_base_units(fee, fee_decimals)
            .ok_or_else(|| EngineError::Rpc("fee out of range".into()))
    }

    fn check_address(&self, address: &str) -> bool {
        self.address_re.is_match(address)
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, EngineError> {
        let key = SigningKey::generate(&mut OsRng);
        let digest = Sha256::digest(key.verifying_key().to_bytes());
        let address = format!("{}1{}", self.address_prefix, hex::encode(&digest[..20]));
        Ok(GeneratedWallet {
            address,
            key: hex::encode(key.to_bytes()),
        })
    }

    fn enqueue(&self, batch: Batch) -> Result<(), EngineError> {
        self.registry.get(&batch.coin)?;
        debug!(
            "enqueue batch {} ({} items) on {}",
            batch.id,
            batch.items.len(),
            self.platform
        );
        self.queue.push(batch);
        Ok(())
    }

    fn queue_heads(&self) -> Vec<(QueueKey, Option<BatchId>)> {
        vec![(self.platform.clone(), self.queue.head_id())]
    }

    async fn dispatch_once(&self) {
        let Some(batch) = self.queue.begin() else { return };
        match self.submit_batch(&batch).await {
            Ok(()) => self.queue.complete(batch.id, true),
            Err(e) => {
                emit_batch_error(&self.bus, &batch, &e.to_string());
                self.queue.complete(batch.id, false);
            }
        }
    }
}
