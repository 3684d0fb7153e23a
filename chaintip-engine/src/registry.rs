use crate::error::RegistryError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;

/// How a coin's value is carried on its platform.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    /// Smart-contract token on an account-model chain (`transfer` call).
    Erc20,
    /// Named asset on a ledger-model chain (native multi-send denom).
    LedgerAsset,
}

/// One row of the static coin table. Immutable after load. Many coin codes
/// may share one platform.
#[derive(Clone, Debug, Deserialize)]
pub struct CoinConfig {
    #[serde(skip)]
    pub code: String,
    /// Platform instance that dispatches this coin ("ether", "bitcoin", ...).
    pub platform: String,
    /// Display/precision decimals, also the base-unit scale.
    pub decimals: u32,
    /// Smallest transfer the business layer should accept.
    pub min_value: Decimal,
    /// Default gas limit for a plain native transfer (account model only).
    #[serde(default)]
    pub gas_hint: Option<u64>,
    /// Where injected protocol-fee items are sent.
    pub fee_wallet: String,
    /// Coin that pays network fees for this coin, when it is not the coin
    /// itself (contract tokens pay in the platform's gas coin).
    #[serde(default)]
    pub fee_coin: Option<String>,
    /// Token contract address or ledger asset name, per `token_kind`.
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub token_kind: Option<TokenKind>,
    /// Staking contract address, for coins that support it.
    #[serde(default)]
    pub stake_contract: Option<String>,
    /// Node / index endpoint for the owning platform.
    pub endpoint: String,
    /// Explorer URL prefix; append a tx hash to get a link.
    pub explorer_url: String,
}

/// Static, read-only coin table. Loaded once at startup; a malformed table
/// is a boot-time fatal error.
#[derive(Debug)]
pub struct CoinRegistry {
    // BTreeMap keeps `codes_for` output stable, which keeps queue ordering
    // deterministic across runs.
    coins: BTreeMap<String, CoinConfig>,
}

impl CoinRegistry {
    /// Parses and validates the coin table from its JSON document.
    pub fn load(raw: &str) -> Result<Self, RegistryError> {
        let mut coins: BTreeMap<String, CoinConfig> = serde_json::from_str(raw)?;
        for (code, coin) in coins.iter_mut() {
            coin.code = code.clone();
        }
        let registry = CoinRegistry { coins };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        for (code, coin) in &self.coins {
            let invalid = |reason: &str| RegistryError::Invalid {
                coin: code.clone(),
                reason: reason.to_string(),
            };
            if coin.platform.is_empty() {
                return Err(invalid("empty platform"));
            }
            if coin.decimals == 0 || coin.decimals > 18 {
                return Err(invalid("decimals must be in 1..=18"));
            }
            if coin.min_value <= Decimal::ZERO {
                return Err(invalid("min_value must be positive"));
            }
            if coin.endpoint.is_empty() {
                return Err(invalid("empty endpoint"));
            }
            if coin.fee_wallet.is_empty() {
                return Err(invalid("empty fee_wallet"));
            }
            if coin.token_kind.is_some() && coin.contract.is_none() {
                return Err(invalid("token coins need a contract/asset name"));
            }
            if let Some(fee_coin) = &coin.fee_coin {
                let fee_cfg = self
                    .coins
                    .get(fee_coin)
                    .ok_or_else(|| invalid("fee_coin not in table"))?;
                if fee_cfg.platform != coin.platform {
                    return Err(invalid("fee_coin must live on the same platform"));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, code: &str) -> Result<&CoinConfig, RegistryError> {
        self.coins
            .get(code)
            .ok_or_else(|| RegistryError::UnknownCoin(code.to_string()))
    }

    pub fn platform_of(&self, code: &str) -> Result<&str, RegistryError> {
        Ok(self.get(code)?.platform.as_str())
    }

    /// Coin codes owned by one platform instance, in stable order.
    pub fn codes_for(&self, platform: &str) -> Vec<String> {
        self.coins
            .values()
            .filter(|c| c.platform == platform)
            .map(|c| c.code.clone())
            .collect()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.coins.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}
