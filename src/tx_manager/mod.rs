//! Transaction lifecycle: nonce allocation, broadcast, confirmation
//! tracking and same-nonce gas bumping.
//!
//! Every attempt is persisted before it is broadcast so a crash between the
//! two never leaves an untracked side effect on chain.

mod models;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::{Address, B256, Bytes, U256};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError, TxReceipt, TxRequest};
use crate::store::{Store, StoreError};

pub use models::{Tx, TxAttempt, TxManagerConfig, bumped_gas_price};

#[derive(Debug, Error)]
pub enum TxManagerError {
    #[error("no transaction tracked for attempt {0}")]
    UnknownTransaction(B256),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TxManager {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    config: TxManagerConfig,
    connected: AtomicBool,
    /// Next nonce for `config.from`. `None` forces a chain lookup.
    next_nonce: tokio::sync::Mutex<Option<u64>>,
    /// One lock per logical transaction so bumps for it never interleave.
    tx_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TxManager {
    pub fn new(client: Arc<dyn ChainClient>, store: Arc<dyn Store>, config: TxManagerConfig) -> Self {
        Self {
            client,
            store,
            config,
            connected: AtomicBool::new(false),
            next_nonce: tokio::sync::Mutex::new(None),
            tx_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            info!(connected, "chain connection changed");
        }
    }

    pub fn config(&self) -> &TxManagerConfig {
        &self.config
    }

    /// Allocate a nonce, sign and broadcast the first attempt of the logical
    /// transaction `tx_id`. Broadcast failures are returned, never retried.
    ///
    /// If `tx_id` is already tracked, its latest attempt is rebroadcast and
    /// returned instead of allocating a second nonce.
    pub async fn create_transaction(
        &self,
        tx_id: &str,
        to: Address,
        data: Bytes,
        gas_price: U256,
        gas_limit: u64,
    ) -> Result<TxAttempt, TxManagerError> {
        let mut next_nonce = self.next_nonce.lock().await;
        if let Some(latest) = self
            .store
            .find_tx(tx_id)?
            .and_then(|tx| tx.latest_attempt().cloned())
        {
            if let Err(err) = self.client.send_raw_transaction(&latest.signed_raw).await {
                debug!(tx = %tx_id, error = %err, "rebroadcast of tracked attempt failed");
            }
            info!(tx = %tx_id, tx_hash = %latest.hash, nonce = latest.nonce, "resuming tracked transaction");
            return Ok(latest);
        }

        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => self.client.transaction_count(self.config.from).await?,
        };
        let block = self.client.block_number().await?;

        let request = TxRequest {
            from: self.config.from,
            to,
            data: data.clone(),
            nonce,
            gas_price,
            gas_limit,
        };
        let signed = self.client.sign_transaction(&request).await?;

        let now = Utc::now();
        let attempt = TxAttempt {
            hash: signed.hash,
            tx_id: tx_id.to_string(),
            nonce,
            gas_price,
            signed_raw: signed.raw.clone(),
            sent_at_block: block,
            created_at: now,
        };
        let tx = Tx {
            id: tx_id.to_string(),
            from: self.config.from,
            to,
            data,
            nonce,
            gas_limit,
            attempts: vec![attempt.clone()],
            created_at: now,
        };
        self.store.save_tx(&tx)?;

        if let Err(err) = self.client.send_raw_transaction(&signed.raw).await {
            // Nothing reached the chain: forget the record and resync the nonce.
            *next_nonce = None;
            if let Err(store_err) = self.store.delete_tx(&tx.id) {
                warn!(tx = %tx.id, error = %store_err, "could not remove unsent transaction");
            }
            return Err(err.into());
        }

        *next_nonce = Some(nonce + 1);
        debug!(tx = %tx.id, nonce, gas_price = %gas_price, block, "transaction created");
        Ok(attempt)
    }

    /// Track the logical transaction owning `hash`. Returns the receipt once
    /// it is `min_confirmations` deep, `None` while it is not yet safe.
    ///
    /// Lookup failures are logged and reported as not yet safe. Once any
    /// attempt is mined no further attempt is broadcast.
    pub async fn bump_gas_until_safe(&self, hash: B256) -> Result<Option<TxReceipt>, TxManagerError> {
        let tx = self
            .store
            .find_tx_by_attempt(hash)?
            .ok_or(TxManagerError::UnknownTransaction(hash))?;

        let lock = self.tx_lock(&tx.id);
        let _guard = lock.lock().await;
        // Reload under the lock: a concurrent caller may have bumped.
        let tx = self
            .store
            .find_tx(&tx.id)?
            .ok_or(TxManagerError::UnknownTransaction(hash))?;

        let block = match self.client.block_number().await {
            Ok(block) => block,
            Err(err) => {
                warn!(tx = %tx.id, error = %err, "block number lookup failed");
                return Ok(None);
            }
        };

        for attempt in tx.attempts.iter().rev() {
            let receipt = match self.client.transaction_receipt(attempt.hash).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    warn!(tx_hash = %attempt.hash, error = %err, "receipt lookup failed");
                    return Ok(None);
                }
            };
            let Some(receipt) = receipt.filter(TxReceipt::is_mined) else {
                continue;
            };
            let mined_at = receipt.block_number.unwrap_or(block);
            let confirmations = block.saturating_sub(mined_at);
            if confirmations >= self.config.min_confirmations {
                info!(tx_hash = %receipt.hash, block, confirmations, "transaction safe");
                self.tx_locks.lock().remove(&tx.id);
                return Ok(Some(receipt));
            }
            debug!(tx_hash = %receipt.hash, block, confirmations, "waiting for confirmations");
            return Ok(None);
        }

        let Some(latest) = tx.latest_attempt() else {
            return Err(TxManagerError::UnknownTransaction(hash));
        };
        if block < latest.sent_at_block.saturating_add(self.config.gas_bump_threshold) {
            return Ok(None);
        }
        self.bump(tx, block).await?;
        Ok(None)
    }

    async fn bump(&self, mut tx: Tx, block: u64) -> Result<(), TxManagerError> {
        let Some(latest) = tx.latest_attempt().cloned() else {
            return Ok(());
        };
        let gas_price = bumped_gas_price(latest.gas_price, &self.config);
        if gas_price > self.config.max_gas_price {
            warn!(
                tx = %tx.id,
                gas_price = %latest.gas_price,
                max_gas_price = %self.config.max_gas_price,
                "gas price cap reached, not bumping"
            );
            return Ok(());
        }

        let request = TxRequest {
            from: tx.from,
            to: tx.to,
            data: tx.data.clone(),
            nonce: tx.nonce,
            gas_price,
            gas_limit: tx.gas_limit,
        };
        let signed = match self.client.sign_transaction(&request).await {
            Ok(signed) => signed,
            Err(err) => {
                warn!(tx = %tx.id, error = %err, "signing bumped attempt failed");
                return Ok(());
            }
        };

        let attempt = TxAttempt {
            hash: signed.hash,
            tx_id: tx.id.clone(),
            nonce: tx.nonce,
            gas_price,
            signed_raw: signed.raw.clone(),
            sent_at_block: block,
            created_at: Utc::now(),
        };
        tx.attempts.push(attempt);
        self.store.save_tx(&tx)?;

        if let Err(err) = self.client.send_raw_transaction(&signed.raw).await {
            warn!(tx = %tx.id, error = %err, "broadcast of bumped attempt failed");
            tx.attempts.pop();
            self.store.save_tx(&tx)?;
            return Ok(());
        }

        info!(
            tx = %tx.id,
            tx_hash = %signed.hash,
            nonce = tx.nonce,
            gas_price = %gas_price,
            block,
            "bumped gas price"
        );
        Ok(())
    }

    fn tx_lock(&self, tx_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.tx_locks.lock();
        Arc::clone(locks.entry(tx_id.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mock_tx_manager;
    use uuid::Uuid;

    const GWEI: u64 = 1_000_000_000;

    async fn create(tm: &TxManager) -> TxAttempt {
        tm.create_transaction(
            &Uuid::new_v4().to_string(),
            Address::repeat_byte(0x11),
            Bytes::from_static(&[1, 2, 3]),
            U256::from(20 * GWEI),
            100_000,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn nonces_are_sequential_per_account() {
        let (tm, chain) = mock_tx_manager();
        chain.set_nonce(7);

        let first = create(&tm).await;
        let second = create(&tm).await;
        assert_eq!(first.nonce, 7);
        assert_eq!(second.nonce, 8);
        assert_eq!(chain.sent_requests().len(), 2);
    }

    #[tokio::test]
    async fn failed_broadcast_is_not_tracked_and_resyncs_nonce() {
        let (tm, chain) = mock_tx_manager();
        chain.set_nonce(3);
        chain.fail_sends(true);

        let err = tm
            .create_transaction("unfunded", Address::ZERO, Bytes::new(), U256::from(GWEI), 21_000)
            .await
            .unwrap_err();
        assert!(matches!(err, TxManagerError::Chain(_)));
        assert!(chain.sent_requests().is_empty());
        assert!(tm.store.find_tx("unfunded").unwrap().is_none());

        chain.fail_sends(false);
        chain.set_nonce(4);
        let attempt = create(&tm).await;
        assert_eq!(attempt.nonce, 4);
    }

    #[tokio::test]
    async fn unknown_hash_is_an_error() {
        let (tm, _) = mock_tx_manager();
        let err = tm.bump_gas_until_safe(B256::repeat_byte(9)).await.unwrap_err();
        assert!(matches!(err, TxManagerError::UnknownTransaction(_)));
    }

    #[tokio::test]
    async fn receipt_returned_only_at_safe_depth() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = create(&tm).await;
        chain.mine(attempt.hash, 105);

        // min_confirmations is 3 in the mock configuration.
        for block in [105, 106, 107] {
            chain.set_block(block);
            assert!(tm.bump_gas_until_safe(attempt.hash).await.unwrap().is_none());
        }
        chain.set_block(108);
        let receipt = tm.bump_gas_until_safe(attempt.hash).await.unwrap().unwrap();
        assert_eq!(receipt.hash, attempt.hash);
        assert!(tm.tx_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn tracked_id_reuses_its_attempt() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        chain.set_nonce(5);
        let to = Address::repeat_byte(0x11);

        let first = tm
            .create_transaction("run-0", to, Bytes::from_static(&[1]), U256::from(GWEI), 21_000)
            .await
            .unwrap();
        let again = tm
            .create_transaction("run-0", to, Bytes::from_static(&[1]), U256::from(GWEI), 21_000)
            .await
            .unwrap();

        assert_eq!(again, first);
        assert!(chain.sent_requests().iter().all(|r| r.nonce == 5));
        assert_eq!(tm.store.find_tx("run-0").unwrap().unwrap().attempts.len(), 1);

        let other = tm
            .create_transaction("run-1", to, Bytes::from_static(&[1]), U256::from(GWEI), 21_000)
            .await
            .unwrap();
        assert_eq!(other.nonce, 6);
    }

    #[tokio::test]
    async fn stuck_attempt_is_bumped_with_same_nonce() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = create(&tm).await;

        // Bump threshold is 5 blocks.
        chain.set_block(104);
        tm.bump_gas_until_safe(attempt.hash).await.unwrap();
        assert_eq!(chain.sent_requests().len(), 1);

        chain.set_block(105);
        tm.bump_gas_until_safe(attempt.hash).await.unwrap();
        chain.set_block(110);
        tm.bump_gas_until_safe(attempt.hash).await.unwrap();

        let sent = chain.sent_requests();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|r| r.nonce == attempt.nonce));
        assert!(sent.windows(2).all(|w| w[1].gas_price > w[0].gas_price));

        let tx = tm.store.find_tx(&attempt.tx_id).unwrap().unwrap();
        assert_eq!(tx.attempts.len(), 3);
        assert_eq!(tx.attempts[0].hash, attempt.hash);
    }

    #[tokio::test]
    async fn mined_attempt_is_never_bumped() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = create(&tm).await;
        chain.mine(attempt.hash, 101);

        chain.set_block(102);
        assert!(tm.bump_gas_until_safe(attempt.hash).await.unwrap().is_none());
        assert_eq!(chain.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn older_attempt_mined_after_bump_completes() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = create(&tm).await;
        chain.set_block(105);
        tm.bump_gas_until_safe(attempt.hash).await.unwrap();
        assert_eq!(chain.sent_requests().len(), 2);

        chain.mine(attempt.hash, 106);
        chain.set_block(120);
        let receipt = tm.bump_gas_until_safe(attempt.hash).await.unwrap().unwrap();
        assert_eq!(receipt.hash, attempt.hash);
        assert_eq!(chain.sent_requests().len(), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_not_safe_and_does_not_bump() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = create(&tm).await;
        chain.set_block(200);
        chain.fail_reads(true);

        assert!(tm.bump_gas_until_safe(attempt.hash).await.unwrap().is_none());
        assert_eq!(chain.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn bump_stops_at_gas_price_cap() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = tm
            .create_transaction("capped", Address::ZERO, Bytes::new(), tm.config().max_gas_price, 21_000)
            .await
            .unwrap();

        chain.set_block(150);
        assert!(tm.bump_gas_until_safe(attempt.hash).await.unwrap().is_none());
        assert_eq!(chain.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_bumps_broadcast_once() {
        let (tm, chain) = mock_tx_manager();
        chain.set_block(100);
        let attempt = create(&tm).await;
        chain.set_block(105);

        let (a, b) = tokio::join!(
            tm.bump_gas_until_safe(attempt.hash),
            tm.bump_gas_until_safe(attempt.hash)
        );
        a.unwrap();
        b.unwrap();
        // The second caller sees the fresh attempt, which has not aged yet.
        assert_eq!(chain.sent_requests().len(), 2);
    }
}
