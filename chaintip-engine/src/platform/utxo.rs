//! UTXO-model adapter. A whole batch becomes one on-chain transaction:
//! inputs are selected from the source wallet's unspent set, every
//! destination item becomes an output, and change returns to the source.

use crate::audit::Database;
use crate::error::{EngineError, NodeError};
use crate::events::EventBus;
use crate::node::{Utxo, UtxoNode};
use crate::platform::{emit_batch_error, record_leg, PlatformAdapter};
use crate::queue::TxQueue;
use crate::registry::CoinRegistry;
use crate::types::{
    from_base_units, to_base_units, Batch, BatchId, GeneratedWallet, QueueKey,
};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, EcdsaSighashType, Network, OutPoint, PrivateKey,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use log::debug;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Outputs below this are uneconomical to spend; change under it is
/// left to the miners instead.
const DUST_SAT: u64 = 546;

// Weight estimates for P2WPKH spends, in virtual bytes.
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;
const OVERHEAD_VBYTES: u64 = 11;

/// Size assumed for the "typical transfer" fee quote: one input, one
/// destination, one change output.
const DEFAULT_TX_VBYTES: u64 = OVERHEAD_VBYTES + INPUT_VBYTES + 2 * OUTPUT_VBYTES;

pub struct UtxoAdapter {
    platform: String,
    network: Network,
    registry: Arc<CoinRegistry>,
    node: Arc<dyn UtxoNode>,
    bus: Arc<EventBus>,
    db: Arc<dyn Database>,
    queue: TxQueue,
}

/// Output plan for one transaction: (address, satoshis).
type PlannedOutput = (String, u64);

impl UtxoAdapter {
    pub fn new(
        platform: &str,
        network: Network,
        registry: Arc<CoinRegistry>,
        node: Arc<dyn UtxoNode>,
        bus: Arc<EventBus>,
        db: Arc<dyn Database>,
    ) -> Self {
        UtxoAdapter {
            platform: platform.to_string(),
            network,
            registry,
            node,
            bus,
            db,
            queue: TxQueue::new(),
        }
    }

    fn fee_for(rate: u64, inputs: usize, outputs: usize) -> u64 {
        rate * (OVERHEAD_VBYTES + INPUT_VBYTES * inputs as u64 + OUTPUT_VBYTES * outputs as u64)
    }

    /// Largest-first selection. `outputs` counts the destinations only;
    /// the change output is accounted for inside. Returns the chosen
    /// inputs and the fee they imply.
    fn select_inputs(
        mut unspent: Vec<Utxo>,
        target: u64,
        rate: u64,
        outputs: usize,
    ) -> Result<(Vec<Utxo>, u64), NodeError> {
        unspent.sort_by(|a, b| b.value.cmp(&a.value));
        let mut chosen = Vec::new();
        let mut sum = 0u64;
        for utxo in unspent {
            sum += utxo.value;
            chosen.push(utxo);
            let fee = Self::fee_for(rate, chosen.len(), outputs + 1);
            if sum >= target + fee {
                return Ok((chosen, fee));
            }
        }
        Err(format!(
            "insufficient confirmed funds: have {} sat, need {} sat plus fees",
            sum, target
        )
        .into())
    }

    fn parse_address(&self, address: &str) -> Result<Address, NodeError> {
        address
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .map_err(|e| format!("bad address {}: {}", address, e))?
            .require_network(self.network)
            .map_err(|e| format!("address {} is for another network: {}", address, e).into())
    }

    /// Builds and signs one P2WPKH transaction spending `inputs` into
    /// `outputs`, with any above-dust remainder returned to the key's
    /// own address.
    fn build_signed_tx(
        &self,
        wif: &str,
        inputs: &[Utxo],
        outputs: &[PlannedOutput],
        fee: u64,
    ) -> Result<String, NodeError> {
        let secp = Secp256k1::new();
        let privkey =
            PrivateKey::from_wif(wif).map_err(|e| format!("bad signing key: {}", e))?;
        let pubkey = CompressedPublicKey::from_private_key(&secp, &privkey)
            .map_err(|e| format!("bad signing key: {}", e))?;
        let own_address = Address::p2wpkh(&pubkey, self.network);
        let own_script = own_address.script_pubkey();

        let input_sum: u64 = inputs.iter().map(|u| u.value).sum();
        let output_sum: u64 = outputs.iter().map(|(_, v)| v).sum();

        let mut tx_inputs = Vec::with_capacity(inputs.len());
        for utxo in inputs {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| format!("bad txid from index {}: {}", utxo.txid, e))?;
            tx_inputs.push(TxIn {
                previous_output: OutPoint {
                    txid,
                    vout: utxo.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            });
        }

        let mut tx_outputs: Vec<TxOut> = Vec::with_capacity(outputs.len() + 1);
        for (address, value) in outputs {
            tx_outputs.push(TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: self.parse_address(address)?.script_pubkey(),
            });
        }
        let change = input_sum
            .checked_sub(output_sum + fee)
            .ok_or("selected inputs do not cover outputs and fee")?;
        if change > DUST_SAT {
            tx_outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: own_script.clone(),
            });
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: tx_outputs,
        };

        // All inputs are spends of the wallet's own P2WPKH outputs.
        let mut witnesses = Vec::with_capacity(inputs.len());
        {
            let mut cache = SighashCache::new(&tx);
            for (index, utxo) in inputs.iter().enumerate() {
                let sighash = cache
                    .p2wpkh_signature_hash(
                        index,
                        &own_script,
                        Amount::from_sat(utxo.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| format!("sighash computation failed: {}", e))?;
                let message = Message::from_digest(sighash.to_byte_array());
                let signature = bitcoin::ecdsa::Signature {
                    signature: secp.sign_ecdsa(&message, &privkey.inner),
                    sighash_type: EcdsaSighashType::All,
                };
                witnesses.push(Witness::p2wpkh(&signature, &pubkey.0));
            }
        }
        for (txin, witness) in tx.input.iter_mut().zip(witnesses) {
            txin.witness = witness;
        }

        Ok(serialize_hex(&tx))
    }

    /// One batch, one transaction, one shared hash across every leg.
    async fn submit_batch(&self, batch: &Batch) -> Result<(), NodeError> {
        let cfg = self.registry.get(&batch.coin)?;
        let mut outputs = Vec::with_capacity(batch.items.len());
        for item in &batch.items {
            let sats = to_base_units(item.value, cfg.decimals)
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| format!("value {} out of range", item.value))?;
            outputs.push((item.address.clone(), sats));
        }
        let target: u64 = outputs.iter().map(|(_, v)| v).sum();

        let rate = self.node.fee_rate().await?;
        let unspent = self.node.list_unspent(&batch.source.address).await?;
        let (inputs, fee) = Self::select_inputs(unspent, target, rate, outputs.len())?;
        debug!(
            "batch {}: {} inputs, {} outputs, fee {} sat at {} sat/vB",
            batch.id,
            inputs.len(),
            outputs.len(),
            fee,
            rate
        );

        let raw = self.build_signed_tx(&batch.source.key, &inputs, &outputs, fee)?;
        let txid = self.node.broadcast(&raw).await?;
        for item in &batch.items {
            record_leg(&self.bus, self.db.as_ref(), batch, item, &txid).await;
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for UtxoAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn get_balance(&self, coin: &str, address: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let sats = self.node.balance(address).await.map_err(EngineError::rpc)?;
        from_base_units(sats as u128, cfg.decimals)
            .ok_or_else(|| EngineError::Rpc("balance out of range".into()))
    }

    async fn get_tx_fee(&self, coin: &str) -> Result<Decimal, EngineError> {
        let cfg = self.registry.get(coin)?;
        let rate = self.node.fee_rate().await.map_err(EngineError::rpc)?;
        from_base_units((rate * DEFAULT_TX_VBYTES) as u128, cfg.decimals)
            .ok_or_else(|| EngineError::Rpc("fee out of range".into()))
    }

    fn check_address(&self, address: &str) -> bool {
        address
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .map(|a| a.require_network(self.network).is_ok())
            .unwrap_or(false)
    }

    fn generate_wallet(&self) -> Result<GeneratedWallet, EngineError> {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        let privkey = PrivateKey::new(secret, self.network);
        let address = Address::p2wpkh(&CompressedPublicKey(public), self.network);
        Ok(GeneratedWallet {
            address: address.to_string(),
            key: privkey.to_wif(),
        })
    }

    fn enqueue(&self, batch: Batch) -> Result<(), EngineError> {
        // One chain, one queue: coins on this platform share the fee market.
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
