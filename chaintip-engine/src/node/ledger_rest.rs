//! Ledger-chain client over the node's REST gateway. Transfers are signed
//! locally with the wallet's ed25519 key and posted as a signed envelope;
//! the node validates the signature and applies the ledger entries.

use crate::error::NodeError;
use crate::node::{LedgerNode, LedgerOutput};
use crate::types::TxId;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

pub struct LedgerRestNode {
    http: reqwest::Client,
    base: String,
    multi_send: bool,
}

impl LedgerRestNode {
    /// `multi_send` mirrors the backend's capability; when false the
    /// adapter issues one call per destination instead.
    pub fn new(endpoint: &str, multi_send: bool) -> Self {
        LedgerRestNode {
            http: reqwest::Client::new(),
            base: endpoint.trim_end_matches('/').to_string(),
            multi_send,
        }
    }

    fn signing_key(key_hex: &str) -> Result<SigningKey, NodeError> {
        let bytes = hex::decode(key_hex.trim_start_matches("0x"))
            .map_err(|e| format!("bad ledger key encoding: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "ledger key must be 32 bytes")?;
        Ok(SigningKey::from_bytes(&bytes))
    }

    async fn post_transfer(
        &self,
        from_key: &str,
        outputs: &[LedgerOutput],
    ) -> Result<TxId, NodeError> {
        let key = Self::signing_key(from_key)?;
        let body = TransferBody {
            outputs: outputs
                .iter()
                .map(|o| WireOutput {
                    to: o.to.clone(),
                    amount: o.amount.to_string(),
                    denom: o.denom.clone(),
                })
                .collect(),
        };
        let payload = serde_json::to_vec(&body)?;
        let signature = key.sign(&payload);

        let envelope = SignedEnvelope {
            payload: hex::encode(&payload),
            pubkey: hex::encode(key.verifying_key().to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        };
        let url = format!("{}/api/v1/broadcast", self.base);
        let response = self
            .http
            .post(&url)
            .json(&envelope)
            .send()
            .await?
            .error_for_status()?;
        let accepted: BroadcastResponse = response.json().await?;
        Ok(accepted.tx_hash)
    }
}

#[derive(Serialize)]
struct WireOutput {
    to: String,
    amount: String,
    denom: String,
}

#[derive(Serialize)]
struct TransferBody {
    outputs: Vec<WireOutput>,
}

#[derive(Serialize)]
struct SignedEnvelope {
    payload: String,
    pubkey: String,
    signature: String,
}

#[derive(Deserialize)]
struct BroadcastResponse {
    tx_hash: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    amount: String,
}

#[derive(Deserialize)]
struct FeeResponse {
    fixed: String,
}

#[async_trait]
impl LedgerNode for LedgerRestNode {
    async fn balance(&self, denom: &str, address: &str) -> Result<u128, NodeError> {
        let url = format!("{}/api/v1/balance/{}/{}", self.base, denom, address);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let balance: BalanceResponse = response.json().await?;
        balance
            .amount
            .parse::<u128>()
            .map_err(|e| format!("bad ledger balance: {}", e).into())
    }

    async fn transfer_fee(&self) -> Result<u128, NodeError> {
        let url = format!("{}/api/v1/fees/transfer", self.base);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let fee: FeeResponse = response.json().await?;
        fee.fixed
            .parse::<u128>()
            .map_err(|e| format!("bad ledger fee: {}", e).into())
    }

    fn supports_multi_send(&self) -> bool {
        self.multi_send
    }

    async fn multi_send(
        &self,
        from_key: &str,
        outputs: &[LedgerOutput],
    ) -> Result<TxId, NodeError> {
        self.post_transfer(from_key, outputs).await
    }

    async fn send(&self, from_key: &str, output: &LedgerOutput) -> Result<TxId, NodeError> {
        self.post_transfer(from_key, std::slice::from_ref(output)).await
    }
}
