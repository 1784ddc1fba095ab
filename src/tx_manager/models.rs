use alloy_primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logical transaction: a single nonce and every broadcast made for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tx {
    pub id: String,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    /// Oldest first. Gas prices are strictly increasing.
    pub attempts: Vec<TxAttempt>,
    pub created_at: DateTime<Utc>,
}

impl Tx {
    pub fn latest_attempt(&self) -> Option<&TxAttempt> {
        self.attempts.last()
    }

    pub fn has_attempt(&self, hash: B256) -> bool {
        self.attempts.iter().any(|a| a.hash == hash)
    }
}

/// A single signed broadcast. Never mutated once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxAttempt {
    pub hash: B256,
    pub tx_id: String,
    pub nonce: u64,
    pub gas_price: U256,
    pub signed_raw: Bytes,
    /// Head when the attempt was broadcast, used to age it.
    pub sent_at_block: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxManagerConfig {
    pub from: Address,
    pub min_confirmations: u64,
    pub gas_bump_threshold: u64,
    pub gas_bump_wei: U256,
    pub gas_bump_percent: u64,
    pub gas_price_default: U256,
    pub gas_limit_default: u64,
    pub max_gas_price: U256,
}

/// Next gas price for a stuck attempt: the larger of the percentage and the
/// fixed bump, and always strictly above `current`.
pub fn bumped_gas_price(current: U256, config: &TxManagerConfig) -> U256 {
    let by_percent = current.saturating_mul(U256::from(100 + config.gas_bump_percent)) / U256::from(100);
    let by_wei = current.saturating_add(config.gas_bump_wei);
    by_percent.max(by_wei).max(current.saturating_add(U256::from(1)))
}
