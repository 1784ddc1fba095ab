//! Scripted chain client and ready-made services for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::adapters::AdapterContext;
use crate::chain::{ChainClient, ChainError, FilterQuery, Log, SignedTx, TxReceipt, TxRequest};
use crate::store::{MemoryStore, Store};
use crate::tx_manager::{TxManager, TxManagerConfig};

/// In-memory chain. Signing serializes the request as JSON, so a broadcast
/// payload can be decoded back into the request that produced it.
#[derive(Default)]
pub struct MockChain {
    block: AtomicU64,
    nonce: AtomicU64,
    fail_reads: AtomicBool,
    fail_sends: AtomicBool,
    fail_logs: AtomicBool,
    receipts: Mutex<HashMap<B256, TxReceipt>>,
    sent: Mutex<Vec<TxRequest>>,
    logs: Mutex<Vec<Log>>,
}

impl MockChain {
    pub fn set_block(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    /// Block number and receipt lookups fail while set.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Only log queries fail while set.
    pub fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn mine(&self, hash: B256, block: u64) {
        let receipt = TxReceipt {
            hash,
            block_number: Some(block),
            block_hash: Some(B256::with_last_byte(block as u8)),
            status: Some(1),
            logs: Vec::new(),
        };
        self.receipts.lock().insert(hash, receipt);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().push(log);
    }

    /// Requests whose signed payload was broadcast, in order.
    pub fn sent_requests(&self) -> Vec<TxRequest> {
        self.sent.lock().clone()
    }

    fn check_reads(&self) -> Result<(), ChainError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "upstream unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.check_reads()?;
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn transaction_count(&self, _account: Address) -> Result<u64, ChainError> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> Result<SignedTx, ChainError> {
        let raw = serde_json::to_vec(tx).map_err(|e| ChainError::Malformed(e.to_string()))?;
        Ok(SignedTx {
            hash: keccak256(&raw),
            raw: raw.into(),
        })
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".into(),
            });
        }
        let request: TxRequest =
            serde_json::from_slice(raw).map_err(|e| ChainError::Malformed(e.to_string()))?;
        self.nonce.fetch_max(request.nonce + 1, Ordering::SeqCst);
        self.sent.lock().push(request);
        Ok(keccak256(raw))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        self.check_reads()?;
        Ok(self.receipts.lock().get(&hash).cloned())
    }

    async fn logs(&self, filter: &FilterQuery) -> Result<Vec<Log>, ChainError> {
        self.check_reads()?;
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -32005,
                message: "query returned more than 10000 results".into(),
            });
        }
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }
}

pub const GWEI: u64 = 1_000_000_000;

/// Three confirmations, bump after five blocks.
pub fn test_tx_config() -> TxManagerConfig {
    TxManagerConfig {
        from: Address::repeat_byte(0xaa),
        min_confirmations: 3,
        gas_bump_threshold: 5,
        gas_bump_wei: U256::from(5 * GWEI),
        gas_bump_percent: 20,
        gas_price_default: U256::from(20 * GWEI),
        gas_limit_default: 500_000,
        max_gas_price: U256::from(1_000 * GWEI),
    }
}

/// Connected manager over a fresh chain and memory store.
pub fn mock_tx_manager() -> (Arc<TxManager>, Arc<MockChain>) {
    mock_tx_manager_on(Arc::new(MemoryStore::new()))
}

pub fn mock_tx_manager_on(store: Arc<dyn Store>) -> (Arc<TxManager>, Arc<MockChain>) {
    let chain = Arc::new(MockChain::default());
    let client: Arc<dyn ChainClient> = chain.clone();
    let tx_manager = Arc::new(TxManager::new(client, store, test_tx_config()));
    tx_manager.set_connected(true);
    (tx_manager, chain)
}

pub fn context(tx_manager: &Arc<TxManager>) -> AdapterContext {
    context_at(tx_manager, Utc::now())
}

pub fn context_at(tx_manager: &Arc<TxManager>, now: DateTime<Utc>) -> AdapterContext {
    AdapterContext {
        run_id: "test-run".into(),
        task_index: 0,
        cancelled: false,
        now,
        tx_manager: Arc::clone(tx_manager),
    }
}
