//! JSON-RPC account-model client built on ethers. Transactions are signed
//! locally and pushed with `eth_sendRawTransaction`; the call returns at
//! pool acceptance, which is what the adapter's nonce pipelining relies on.

use crate::error::NodeError;
use crate::node::{AccountNode, AccountTx};
use crate::types::TxId;
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use log::debug;

pub struct EvmNode {
    provider: Provider<Http>,
}

impl EvmNode {
    pub fn new(endpoint: &str) -> Result<Self, NodeError> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| format!("bad rpc endpoint {}: {}", endpoint, e))?;
        Ok(EvmNode { provider })
    }

    fn parse_address(address: &str) -> Result<Address, NodeError> {
        address
            .parse::<Address>()
            .map_err(|e| format!("bad account address {}: {}", address, e).into())
    }
}

pub fn u256_to_u128(v: U256) -> Result<u128, NodeError> {
    if v > U256::from(u128::MAX) {
        return Err(format!("value {} exceeds u128 range", v).into());
    }
    Ok(v.low_u128())
}

/// ABI payload for `transfer(address,uint256)`.
pub fn erc20_transfer_data(to: &str, amount: u128) -> Result<Vec<u8>, NodeError> {
    let to = EvmNode::parse_address(to)?;
    let mut data = ethers::utils::id("transfer(address,uint256)").to_vec();
    data.extend(ethers::abi::encode(&[
        Token::Address(to),
        Token::Uint(U256::from(amount)),
    ]));
    Ok(data)
}

/// ABI payload for `balanceOf(address)`.
pub fn erc20_balance_of_data(owner: &str) -> Result<Vec<u8>, NodeError> {
    let owner = EvmNode::parse_address(owner)?;
    let mut data = ethers::utils::id("balanceOf(address)").to_vec();
    data.extend(ethers::abi::encode(&[Token::Address(owner)]));
    Ok(data)
}

/// ABI payload for an arbitrary call, from its canonical signature.
pub fn contract_call_data(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = ethers::utils::id(signature).to_vec();
    data.extend(ethers::abi::encode(args));
    data
}

/// Reads one big-endian word out of a call result.
pub fn decode_word(output: &[u8], index: usize) -> Result<U256, NodeError> {
    let start = index * 32;
    let end = start + 32;
    if output.len() < end {
        return Err(format!(
            "call output too short: wanted word {}, got {} bytes",
            index,
            output.len()
        )
        .into());
    }
    Ok(U256::from_big_endian(&output[start..end]))
}

#[async_trait]
impl AccountNode for EvmNode {
    async fn balance(&self, address: &str) -> Result<u128, NodeError> {
        let address = Self::parse_address(address)?;
        let balance = self.provider.get_balance(address, None).await?;
        u256_to_u128(balance)
    }

    async fn token_balance(&self, contract: &str, address: &str) -> Result<u128, NodeError> {
        let output = self
            .call(contract, erc20_balance_of_data(address)?)
            .await?;
        u256_to_u128(decode_word(&output, 0)?)
    }

    async fn gas_price(&self) -> Result<u128, NodeError> {
        u256_to_u128(self.provider.get_gas_price().await?)
    }

    async fn next_nonce(&self, address: &str) -> Result<u64, NodeError> {
        let address = Self::parse_address(address)?;
        let count = self.provider.get_transaction_count(address, None).await?;
        Ok(count.as_u64())
    }

    async fn submit(&self, tx: AccountTx) -> Result<TxId, NodeError> {
        let chain_id = self.provider.get_chainid().await?.as_u64();
        let wallet = tx
            .from_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| format!("bad signing key: {}", e))?
            .with_chain_id(chain_id);

        let to = Self::parse_address(&tx.to)?;
        let mut request = TransactionRequest::new()
            .from(wallet.address())
            .to(to)
            .nonce(tx.nonce)
            .gas(tx.gas_limit)
            .gas_price(U256::from(tx.gas_price));
        request = match tx.data {
            Some(data) => request.data(Bytes::from(data)),
            None => request.value(U256::from(tx.value)),
        };

        let typed: TypedTransaction = request.into();
        let signature = wallet.sign_transaction(&typed).await?;
        let raw = typed.rlp_signed(&signature);
        let pending = self.provider.send_raw_transaction(raw).await?;
        let hash = format!("{:#x}", pending.tx_hash());
        debug!("submitted account tx nonce={} hash={}", tx.nonce, hash);
        Ok(hash)
    }

    async fn call(&self, contract: &str, data: Vec<u8>) -> Result<Vec<u8>, NodeError> {
        let contract = Self::parse_address(contract)?;
        let request = TransactionRequest::new().to(contract).data(Bytes::from(data));
        let typed: TypedTransaction = request.into();
        let output = self.provider.call(&typed, None).await?;
        Ok(output.to_vec())
    }
}
