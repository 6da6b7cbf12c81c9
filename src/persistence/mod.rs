//! Persistence layer: the submission record store.
//!
//! [`SubmissionStore`] is the repository interface every worker goes
//! through, one method per query. [`postgres::PostgresSubmissionStore`]
//! backs it with parameterized statements on `sqlx::PgPool`;
//! [`memory::MemorySubmissionStore`] keeps the same rows in process.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num::BigInt;

use crate::domain::{
    Address, FilledOrder, FilledOrderRecord, Hash, NewAttempt, ResultUpdate, SubmissionAttempt,
    SubmitStatus, Transition,
};
use crate::error::{LedgerError, Result};

pub use memory::MemorySubmissionStore;
pub use postgres::PostgresSubmissionStore;

/// Repository of ring submission attempts and their fills.
///
/// Implementations must keep at most one pending attempt per
/// (miner, nonce) and report a violating insert as
/// [`LedgerError::Conflict`].
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Inserts a pending attempt and returns it with its assigned id and
    /// creation time.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] if the miner already has a pending attempt
    /// at this nonce.
    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<SubmissionAttempt>;

    /// Fetches an attempt by record id.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no row has this id.
    async fn attempt_by_id(&self, id: i64) -> Result<SubmissionAttempt>;

    /// Fetches the earliest attempt of a ring.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the ring has no attempt.
    async fn attempt_by_ring_hash(&self, ring_hash: &Hash) -> Result<SubmissionAttempt>;

    /// All attempts of a ring, oldest first.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    async fn attempts_by_ring_hash(&self, ring_hash: &Hash) -> Result<Vec<SubmissionAttempt>>;

    /// All attempts broadcast as `tx_hash`.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    async fn attempts_by_tx_hash(&self, tx_hash: &Hash) -> Result<Vec<SubmissionAttempt>>;

    /// Atomically writes status and chain-observed fields.
    ///
    /// Returns the number of rows written; 0 when the update repeats a
    /// terminal status already stored.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the target matches nothing,
    /// [`LedgerError::InvalidTransition`] if a matched attempt is terminal
    /// with a different status.
    async fn update_result(&self, update: &ResultUpdate) -> Result<u64>;

    /// Records gas used by every attempt broadcast as `tx_hash`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no attempt carries `tx_hash`.
    async fn update_used_gas(&self, tx_hash: &Hash, used_gas: &BigInt) -> Result<u64>;

    /// Replaces the error text of one attempt.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidArgument`] for an empty description,
    /// [`LedgerError::NotFound`] for an unknown id.
    async fn update_error(&self, id: i64, error: &str) -> Result<()>;

    /// Whether an attempt for (`miner`, `nonce`) was created after `after`.
    ///
    /// # Errors
    ///
    /// Store failures.
    async fn has_resubmitted(
        &self,
        after: DateTime<Utc>,
        miner: &Address,
        nonce: u64,
    ) -> Result<bool>;

    /// Pending attempts above their account's watermark created before
    /// `cutoff`, ordered by miner then nonce, read from one snapshot.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    async fn pending_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionAttempt>>;

    /// Highest nonce recorded for `miner` in any status.
    ///
    /// # Errors
    ///
    /// Store failures.
    async fn max_nonce(&self, miner: &Address) -> Result<Option<u64>>;

    /// Appends the fills of a ring and returns their ids.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the ring has no attempt.
    async fn insert_filled_orders(&self, ring_hash: &Hash, fills: &[FilledOrder])
    -> Result<Vec<i64>>;

    /// Fills recorded for a ring, in insertion order.
    ///
    /// # Errors
    ///
    /// Store and decode failures.
    async fn filled_orders_by_ring_hash(&self, ring_hash: &Hash)
    -> Result<Vec<FilledOrderRecord>>;
}

/// Decides which matched rows a result update writes.
///
/// `matched` holds (id, stored status) of every row the target selects.
/// Returns the ids to write, which is empty when every row already holds
/// the requested terminal status.
pub(crate) fn plan_update(
    matched: &[(i64, SubmitStatus)],
    update: &ResultUpdate,
) -> Result<Vec<i64>> {
    if matched.is_empty() {
        return Err(LedgerError::NotFound(format!(
            "no attempt matches {:?}",
            update.target
        )));
    }
    let mut writes = Vec::with_capacity(matched.len());
    for &(id, stored) in matched {
        match stored.transition(update.status) {
            Transition::Apply => writes.push(id),
            Transition::Unchanged => {}
            Transition::Rejected => {
                return Err(LedgerError::InvalidTransition {
                    id,
                    from: stored,
                    to: update.status,
                });
            }
        }
    }
    Ok(writes)
}

/// Rejects an empty error description.
pub(crate) fn require_error_text(id: i64, error: &str) -> Result<()> {
    if error.trim().is_empty() {
        return Err(LedgerError::InvalidArgument(format!(
            "error description for attempt {id} is empty"
        )));
    }
    Ok(())
}
