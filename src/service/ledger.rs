//! Submission ledger: the bookkeeping entry point for submission workers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use num::BigInt;
use tokio::sync::Mutex;

use crate::config::LedgerConfig;
use crate::domain::{
    Address, FilledOrder, FilledOrderRecord, Hash, NewAttempt, ResultUpdate, SubmissionAttempt,
};
use crate::error::{LedgerError, Result};
use crate::nonce;
use crate::persistence::{PostgresSubmissionStore, SubmissionStore};

/// Orchestration layer over a [`SubmissionStore`].
///
/// Owns one async mutex per submitter so that allocating a nonce and
/// inserting the attempt that consumes it happen as one unit within this
/// process. Across processes the store's pending-slot uniqueness turns a
/// lost race into [`LedgerError::Conflict`], which the caller answers by
/// calling [`SubmissionLedger::submit`] again. A submitter's mutex is
/// dropped as soon as no insert for it is in flight.
#[derive(Debug)]
pub struct SubmissionLedger<S> {
    store: Arc<S>,
    account_locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
    pending_grace: Duration,
}

impl<S: SubmissionStore> SubmissionLedger<S> {
    /// Creates a ledger reporting attempts as pending once they are older
    /// than `pending_grace`.
    #[must_use]
    pub fn new(store: Arc<S>, pending_grace: Duration) -> Self {
        Self {
            store,
            account_locks: Mutex::new(HashMap::new()),
            pending_grace,
        }
    }

    /// Returns a reference to the inner store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn account_lock(&self, miner: Address) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        Arc::clone(locks.entry(miner).or_default())
    }

    /// Drops the lock entry of `miner` once no caller holds a handle to it.
    ///
    /// Handles are only cloned under the map lock, so a count of one means
    /// the map's own reference is the last.
    async fn release_account_lock(&self, miner: &Address) {
        let mut locks = self.account_locks.lock().await;
        if locks
            .get(miner)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(miner);
        }
    }

    /// Next nonce for `miner`: one past the highest ever recorded, in any
    /// status, or 0 for a new account.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn next_nonce(&self, miner: &Address) -> Result<u64> {
        let max = self.store.max_nonce(miner).await?;
        Ok(nonce::next_nonce(max))
    }

    /// Allocates the next nonce of `attempt.miner` and records the attempt
    /// with it, overwriting `attempt.tx_nonce`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] if another process took the nonce first.
    pub async fn submit(&self, mut attempt: NewAttempt) -> Result<SubmissionAttempt> {
        let miner = attempt.miner;
        let lock = self.account_lock(miner).await;
        let inserted = {
            let _guard = lock.lock().await;
            match self.next_nonce(&miner).await {
                Ok(next) => {
                    attempt.tx_nonce = next;
                    self.store.insert_attempt(&attempt).await
                }
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.release_account_lock(&miner).await;

        let created = inserted.inspect_err(|e| {
            tracing::warn!(
                %miner,
                nonce = attempt.tx_nonce,
                error = %e,
                "attempt insert rejected"
            );
        })?;
        tracing::info!(
            id = created.id,
            ring_hash = %created.ring_hash,
            miner = %created.miner,
            nonce = created.tx_nonce,
            "attempt recorded"
        );
        Ok(created)
    }

    /// Records an attempt at the nonce the caller chose, typically a
    /// resend into a slot whose previous attempt was marked failed.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] if a pending attempt already holds the
    /// slot.
    pub async fn create_attempt(&self, attempt: &NewAttempt) -> Result<SubmissionAttempt> {
        let lock = self.account_lock(attempt.miner).await;
        let inserted = {
            let _guard = lock.lock().await;
            self.store.insert_attempt(attempt).await
        };
        drop(lock);
        self.release_account_lock(&attempt.miner).await;

        let created = inserted?;
        tracing::info!(
            id = created.id,
            ring_hash = %created.ring_hash,
            miner = %created.miner,
            nonce = created.tx_nonce,
            "attempt recorded at caller nonce"
        );
        Ok(created)
    }

    /// Fetches an attempt by record id.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown id.
    pub async fn attempt_by_id(&self, id: i64) -> Result<SubmissionAttempt> {
        self.store.attempt_by_id(id).await
    }

    /// Fetches the first attempt recorded for a ring.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the ring was never submitted.
    pub async fn attempt_by_ring_hash(&self, ring_hash: &Hash) -> Result<SubmissionAttempt> {
        self.store.attempt_by_ring_hash(ring_hash).await.inspect_err(|e| {
            if matches!(e, LedgerError::NotFound(_)) {
                tracing::debug!(%ring_hash, "no attempt for ring");
            }
        })
    }

    /// Every attempt of a ring, oldest first.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    pub async fn attempts_by_ring_hash(&self, ring_hash: &Hash) -> Result<Vec<SubmissionAttempt>> {
        self.store.attempts_by_ring_hash(ring_hash).await
    }

    /// Attempts broadcast as `tx_hash`.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    pub async fn attempts_by_tx_hash(&self, tx_hash: &Hash) -> Result<Vec<SubmissionAttempt>> {
        self.store.attempts_by_tx_hash(tx_hash).await
    }

    /// Writes a chain-observed result. Repeating a terminal update is a
    /// no-op and returns 0.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] or [`LedgerError::InvalidTransition`].
    pub async fn update_result(&self, update: &ResultUpdate) -> Result<u64> {
        match self.store.update_result(update).await {
            Ok(0) => {
                tracing::debug!(
                    target_key = ?update.target,
                    status = %update.status,
                    "result already recorded"
                );
                Ok(0)
            }
            Ok(written) => {
                tracing::info!(
                    target_key = ?update.target,
                    status = %update.status,
                    written,
                    "submission result recorded"
                );
                Ok(written)
            }
            Err(e) => {
                tracing::warn!(
                    target_key = ?update.target,
                    error = %e,
                    "submission result rejected"
                );
                Err(e)
            }
        }
    }

    /// Records the gas used by `tx_hash`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no attempt was broadcast as `tx_hash`.
    pub async fn update_used_gas(&self, tx_hash: &Hash, used_gas: &BigInt) -> Result<u64> {
        let written = self.store.update_used_gas(tx_hash, used_gas).await?;
        tracing::debug!(%tx_hash, %used_gas, written, "used gas recorded");
        Ok(written)
    }

    /// Records a failure description on one attempt.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidArgument`] for an empty description,
    /// [`LedgerError::NotFound`] for an unknown id.
    pub async fn update_error(&self, id: i64, error: &str) -> Result<()> {
        self.store.update_error(id, error).await?;
        tracing::info!(id, error, "attempt error recorded");
        Ok(())
    }

    /// Whether (`miner`, `nonce`) got a newer attempt after `after`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn has_resubmitted(
        &self,
        after: DateTime<Utc>,
        miner: &Address,
        nonce: u64,
    ) -> Result<bool> {
        self.store.has_resubmitted(after, miner, nonce).await
    }

    /// Live pending attempts created before `cutoff`, lowest nonce of each
    /// account first.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    pub async fn pending_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionAttempt>> {
        let pending = self.store.pending_attempts(cutoff).await?;
        tracing::debug!(count = pending.len(), %cutoff, "pending attempts resolved");
        Ok(pending)
    }

    /// [`Self::pending_attempts`] with the cutoff set to now minus the
    /// configured grace period.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    pub async fn pending_for_recheck(&self) -> Result<Vec<SubmissionAttempt>> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.pending_grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.pending_attempts(cutoff).await
    }

    /// Records the fills computed for a ring.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the ring has no attempt.
    pub async fn save_filled_orders(
        &self,
        ring_hash: &Hash,
        fills: &[FilledOrder],
    ) -> Result<Vec<i64>> {
        let ids = self.store.insert_filled_orders(ring_hash, fills).await?;
        tracing::info!(%ring_hash, count = ids.len(), "filled orders recorded");
        Ok(ids)
    }

    /// Fills recorded for a ring.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    pub async fn filled_orders_by_ring_hash(
        &self,
        ring_hash: &Hash,
    ) -> Result<Vec<FilledOrderRecord>> {
        self.store.filled_orders_by_ring_hash(ring_hash).await
    }
}

impl SubmissionLedger<PostgresSubmissionStore> {
    /// Connects to PostgreSQL per `config` and builds a ledger with the
    /// configured grace period.
    ///
    /// # Errors
    ///
    /// Connection and migration failures from
    /// [`PostgresSubmissionStore::connect`].
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let store = PostgresSubmissionStore::connect(config).await?;
        Ok(Self::new(Arc::new(store), config.pending_grace()))
    }
}
