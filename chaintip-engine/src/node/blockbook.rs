//! UTXO index client speaking the Blockbook v2 REST API.

use crate::error::NodeError;
use crate::node::{Utxo, UtxoNode};
use crate::types::TxId;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

// Confirmation target for fee estimates, in blocks.
const FEE_TARGET_BLOCKS: u32 = 4;

pub struct BlockbookNode {
    http: reqwest::Client,
    base: String,
}

impl BlockbookNode {
    pub fn new(endpoint: &str) -> Self {
        BlockbookNode {
            http: reqwest::Client::new(),
            base: endpoint.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        let url = format!("{}{}", self.base, path);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[derive(Deserialize)]
struct AddressInfo {
    balance: String,
}

#[derive(Deserialize)]
struct UtxoEntry {
    txid: String,
    vout: u32,
    value: String,
}

#[derive(Deserialize)]
struct ResultEnvelope {
    result: String,
}

#[async_trait]
impl UtxoNode for BlockbookNode {
    async fn balance(&self, address: &str) -> Result<u64, NodeError> {
        let info: AddressInfo = self.get_json(&format!("/api/v2/address/{}", address)).await?;
        info.balance
            .parse::<u64>()
            .map_err(|e| format!("bad balance from index: {}", e).into())
    }

    async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, NodeError> {
        let entries: Vec<UtxoEntry> =
            self.get_json(&format!("/api/v2/utxo/{}", address)).await?;
        entries
            .into_iter()
            .map(|e| {
                let value = e
                    .value
                    .parse::<u64>()
                    .map_err(|err| format!("bad utxo value from index: {}", err))?;
                Ok(Utxo {
                    txid: e.txid,
                    vout: e.vout,
                    value,
                })
            })
            .collect()
    }

    async fn fee_rate(&self) -> Result<u64, NodeError> {
        let envelope: ResultEnvelope = self
            .get_json(&format!("/api/v2/estimatefee/{}", FEE_TARGET_BLOCKS))
            .await?;
        // Blockbook reports coin/kB; convert to sat/vB, never below 1.
        let coin_per_kb = Decimal::from_str(&envelope.result)
            .map_err(|e| format!("bad fee estimate from index: {}", e))?;
        let sat_per_vb = (coin_per_kb * Decimal::from(100_000_000u64) / Decimal::from(1_000u64))
            .trunc()
            .to_u64()
            .ok_or("fee estimate out of range")?;
        Ok(sat_per_vb.max(1))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<TxId, NodeError> {
        let envelope: ResultEnvelope =
            self.get_json(&format!("/api/v2/sendtx/{}", raw_hex)).await?;
        Ok(envelope.result)
    }
}
