//! In-process submission store.
//!
//! [`MemorySubmissionStore`] keeps encoded rows in a `Vec` behind a single
//! [`tokio::sync::RwLock`], so every query sees one consistent snapshot
//! and every write is atomic. Rows are stored in their text form, which
//! keeps read-back behavior (including corruption reporting) identical to
//! the PostgreSQL store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num::BigInt;
use tokio::sync::RwLock;

use super::models::{AttemptRow, FilledOrderRow, nonce_from_column, nonce_to_column};
use super::{SubmissionStore, plan_update, require_error_text};
use crate::codec;
use crate::domain::{
    Address, FilledOrder, FilledOrderRecord, Hash, NewAttempt, ResultUpdate, SubmissionAttempt,
    SubmitStatus, UpdateTarget,
};
use crate::error::{LedgerError, Result};
use crate::nonce::{self, Slot};

/// Source of creation timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct Tables {
    attempts: Vec<AttemptRow>,
    fills: Vec<FilledOrderRow>,
    last_attempt_id: i64,
    last_fill_id: i64,
}

impl Tables {
    /// Rows are appended with increasing ids, so the table stays sorted.
    fn row(&self, id: i64) -> Option<&AttemptRow> {
        self.attempts
            .binary_search_by_key(&id, |row| row.id)
            .ok()
            .and_then(|index| self.attempts.get(index))
    }

    fn decode_where<F>(&self, predicate: F) -> Result<Vec<SubmissionAttempt>>
    where
        F: Fn(&AttemptRow) -> bool,
    {
        self.attempts
            .iter()
            .filter(|&row| predicate(row))
            .cloned()
            .map(SubmissionAttempt::try_from)
            .collect()
    }

    /// Whether a pending row outside `except` holds (`miner`, `nonce`).
    fn pending_slot_taken(&self, miner: &str, nonce: i64, except: &[i64]) -> bool {
        let pending = SubmitStatus::Pending.code();
        self.attempts.iter().any(|row| {
            !except.contains(&row.id)
                && row.miner == miner
                && row.tx_nonce == nonce
                && row.status == pending
        })
    }
}

/// Nonce columns of a raw row, read without decoding amounts.
///
/// Rows with an unknown status or a negative nonce take part in neither
/// the watermark nor the pending set, as in the SQL query.
fn slot(row: &AttemptRow) -> Option<Slot<&str>> {
    Some(Slot {
        id: row.id,
        account: row.miner.as_str(),
        nonce: u64::try_from(row.tx_nonce).ok()?,
        status: SubmitStatus::from_code(row.status).ok()?,
        create_time: row.create_time,
    })
}

/// Submission store held entirely in memory.
pub struct MemorySubmissionStore {
    tables: RwLock<Tables>,
    clock: Clock,
}

impl MemorySubmissionStore {
    /// Creates an empty store stamping rows with [`Utc::now`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    /// Creates an empty store stamping rows with `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Overwrites a stored attempt row as-is, bypassing every check.
    ///
    /// Used to reproduce rows written by other producers, including
    /// malformed ones.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no row has `row.id`.
    pub async fn put_raw_attempt(&self, row: AttemptRow) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .attempts
            .iter_mut()
            .find(|stored| stored.id == row.id)
            .ok_or_else(|| LedgerError::NotFound(format!("attempt {}", row.id)))?;
        *slot = row;
        Ok(())
    }

    /// Number of stored attempts.
    pub async fn attempt_count(&self) -> usize {
        self.tables.read().await.attempts.len()
    }
}

impl Default for MemorySubmissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemorySubmissionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubmissionStore")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<SubmissionAttempt> {
        let mut row = AttemptRow::from_new(attempt, (self.clock)())?;
        let mut tables = self.tables.write().await;
        if tables.pending_slot_taken(&row.miner, row.tx_nonce, &[]) {
            return Err(LedgerError::Conflict {
                miner: row.miner,
                nonce: attempt.tx_nonce,
            });
        }
        tables.last_attempt_id += 1;
        row.id = tables.last_attempt_id;
        tables.attempts.push(row.clone());
        SubmissionAttempt::try_from(row)
    }

    async fn attempt_by_id(&self, id: i64) -> Result<SubmissionAttempt> {
        let tables = self.tables.read().await;
        let row = tables
            .row(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("attempt {id}")))?;
        SubmissionAttempt::try_from(row)
    }

    async fn attempt_by_ring_hash(&self, ring_hash: &Hash) -> Result<SubmissionAttempt> {
        let ring = ring_hash.to_hex();
        let tables = self.tables.read().await;
        let row = tables
            .attempts
            .iter()
            .filter(|row| row.ring_hash == ring)
            .min_by_key(|row| row.id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("ring {ring}")))?;
        SubmissionAttempt::try_from(row)
    }

    async fn attempts_by_ring_hash(&self, ring_hash: &Hash) -> Result<Vec<SubmissionAttempt>> {
        let ring = ring_hash.to_hex();
        self.tables
            .read()
            .await
            .decode_where(|row| row.ring_hash == ring)
    }

    async fn attempts_by_tx_hash(&self, tx_hash: &Hash) -> Result<Vec<SubmissionAttempt>> {
        let tx = tx_hash.to_hex();
        self.tables
            .read()
            .await
            .decode_where(|row| row.protocol_tx_hash == tx)
    }

    async fn update_result(&self, update: &ResultUpdate) -> Result<u64> {
        let nonce = update.nonce_to_apply().map(nonce_to_column).transpose()?;
        let mut tables = self.tables.write().await;

        let matched = match update.target {
            UpdateTarget::Id(id) => tables
                .attempts
                .iter()
                .filter(|row| row.id == id)
                .map(|row| row.status().map(|status| (row.id, status)))
                .collect::<Result<Vec<_>>>()?,
            UpdateTarget::RingTx { ring_hash, tx_hash } => {
                let (ring, tx) = (ring_hash.to_hex(), tx_hash.to_hex());
                tables
                    .attempts
                    .iter()
                    .filter(|row| row.ring_hash == ring && row.protocol_tx_hash == tx)
                    .map(|row| row.status().map(|status| (row.id, status)))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        let writes = plan_update(&matched, update)?;

        if let (Some(nonce), SubmitStatus::Pending) = (nonce, update.status) {
            // Every written row moves to `nonce`, so two of one miner collide.
            let mut claimed: Vec<&str> = Vec::with_capacity(writes.len());
            for row in tables.attempts.iter().filter(|row| writes.contains(&row.id)) {
                if claimed.contains(&row.miner.as_str())
                    || tables.pending_slot_taken(&row.miner, nonce, &writes)
                {
                    return Err(LedgerError::Conflict {
                        miner: row.miner.clone(),
                        nonce: update.tx_nonce,
                    });
                }
                claimed.push(&row.miner);
            }
        }

        for row in tables
            .attempts
            .iter_mut()
            .filter(|row| writes.contains(&row.id))
        {
            row.status = update.status.code();
            row.ring_index = codec::encode(update.ring_index.as_ref());
            row.block_number = codec::encode(update.block_number.as_ref());
            row.protocol_used_gas = codec::encode(update.used_gas.as_ref());
            if let Some(tx_hash) = update.tx_hash {
                row.protocol_tx_hash = tx_hash.to_hex();
            }
            row.err.clone_from(&update.error);
            if let Some(nonce) = nonce {
                row.tx_nonce = nonce;
            }
        }
        Ok(writes.len() as u64)
    }

    async fn update_used_gas(&self, tx_hash: &Hash, used_gas: &BigInt) -> Result<u64> {
        let tx = tx_hash.to_hex();
        let gas = codec::encode(Some(used_gas));
        let mut tables = self.tables.write().await;
        let mut written = 0u64;
        for row in tables
            .attempts
            .iter_mut()
            .filter(|row| row.protocol_tx_hash == tx)
        {
            row.protocol_used_gas.clone_from(&gas);
            written += 1;
        }
        if written == 0 {
            return Err(LedgerError::NotFound(format!("tx {tx}")));
        }
        Ok(written)
    }

    async fn update_error(&self, id: i64, error: &str) -> Result<()> {
        require_error_text(id, error)?;
        let mut tables = self.tables.write().await;
        let row = tables
            .attempts
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| LedgerError::NotFound(format!("attempt {id}")))?;
        row.err = error.to_string();
        Ok(())
    }

    async fn has_resubmitted(
        &self,
        after: DateTime<Utc>,
        miner: &Address,
        nonce: u64,
    ) -> Result<bool> {
        let (miner, nonce) = (miner.to_hex(), nonce_to_column(nonce)?);
        let tables = self.tables.read().await;
        Ok(tables
            .attempts
            .iter()
            .any(|row| row.miner == miner && row.tx_nonce == nonce && row.create_time > after))
    }

    async fn pending_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionAttempt>> {
        let tables = self.tables.read().await;
        let slots: Vec<Slot<&str>> = tables.attempts.iter().filter_map(slot).collect();
        nonce::live_slots(&slots, cutoff)
            .iter()
            .filter_map(|live| tables.row(live.id))
            .cloned()
            .map(SubmissionAttempt::try_from)
            .collect()
    }

    async fn max_nonce(&self, miner: &Address) -> Result<Option<u64>> {
        let miner = miner.to_hex();
        let tables = self.tables.read().await;
        tables
            .attempts
            .iter()
            .filter(|row| row.miner == miner)
            .map(|row| row.tx_nonce)
            .max()
            .map(nonce_from_column)
            .transpose()
    }

    async fn insert_filled_orders(
        &self,
        ring_hash: &Hash,
        fills: &[FilledOrder],
    ) -> Result<Vec<i64>> {
        let ring = ring_hash.to_hex();
        let mut tables = self.tables.write().await;
        if !tables.attempts.iter().any(|row| row.ring_hash == ring) {
            return Err(LedgerError::NotFound(format!("ring {ring}")));
        }
        let mut ids = Vec::with_capacity(fills.len());
        for fill in fills {
            let mut row = FilledOrderRow::from_fill(ring_hash, fill);
            tables.last_fill_id += 1;
            row.id = tables.last_fill_id;
            ids.push(row.id);
            tables.fills.push(row);
        }
        Ok(ids)
    }

    async fn filled_orders_by_ring_hash(
        &self,
        ring_hash: &Hash,
    ) -> Result<Vec<FilledOrderRecord>> {
        let ring = ring_hash.to_hex();
        let tables = self.tables.read().await;
        tables
            .fills
            .iter()
            .filter(|row| row.ring_hash == ring)
            .cloned()
            .map(FilledOrderRecord::try_from)
            .collect()
    }
}
