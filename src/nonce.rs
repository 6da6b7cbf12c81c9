//! Per-account nonce bookkeeping.
//!
//! Pure functions over the nonce-relevant columns of an attempt history:
//! the watermark (highest terminal nonce per submitter), the pending
//! filter built on it and the next-nonce rule. Store implementations
//! either call these directly or express the same rules in SQL.
//!
//! The functions work on [`Slot`]s rather than full attempts so a store
//! can evaluate them before decoding any amount column; only the rows that
//! survive the filter are ever decoded.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use crate::domain::{Address, SubmissionAttempt, SubmitStatus};

/// The columns the nonce rules read from one attempt.
///
/// `A` identifies the submitting account: [`Address`] for decoded
/// attempts, the stored hex text for raw rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot<A> {
    /// Record id.
    pub id: i64,
    /// Submitting account.
    pub account: A,
    /// Consumed nonce.
    pub nonce: u64,
    /// Lifecycle state.
    pub status: SubmitStatus,
    /// Creation time.
    pub create_time: DateTime<Utc>,
}

impl From<&SubmissionAttempt> for Slot<Address> {
    fn from(attempt: &SubmissionAttempt) -> Self {
        Self {
            id: attempt.id,
            account: attempt.miner,
            nonce: attempt.tx_nonce,
            status: attempt.status,
            create_time: attempt.create_time,
        }
    }
}

/// Highest nonce each submitter has in a terminal status.
///
/// Submitters with no terminal attempt are absent from the map.
#[must_use]
pub fn blocked_nonces<'a, A, I>(slots: I) -> HashMap<A, u64>
where
    A: Eq + Hash + Clone + 'a,
    I: IntoIterator<Item = &'a Slot<A>>,
{
    let mut blocked: HashMap<A, u64> = HashMap::new();
    for slot in slots {
        if !SubmitStatus::BLOCKING.contains(&slot.status) {
            continue;
        }
        blocked
            .entry(slot.account.clone())
            .and_modify(|nonce| *nonce = (*nonce).max(slot.nonce))
            .or_insert(slot.nonce);
    }
    blocked
}

/// Whether a pending slot is still worth tracking.
///
/// Stale when its nonce is at or below the submitter's watermark, too
/// fresh when created at or after `cutoff`.
#[must_use]
pub fn is_live<A>(slot: &Slot<A>, watermark: Option<u64>, cutoff: DateTime<Utc>) -> bool {
    slot.status == SubmitStatus::Pending
        && slot.create_time < cutoff
        && watermark.is_none_or(|blocked| slot.nonce > blocked)
}

/// Pending slots that are neither superseded nor too recent.
///
/// Ordered by submitter, then nonce ascending, then id, so the lowest
/// outstanding nonce of each account comes first.
#[must_use]
pub fn live_slots<A>(slots: &[Slot<A>], cutoff: DateTime<Utc>) -> Vec<Slot<A>>
where
    A: Eq + Hash + Ord + Clone,
{
    let blocked = blocked_nonces(slots);
    let mut live: Vec<Slot<A>> = slots
        .iter()
        .filter(|slot| is_live(slot, blocked.get(&slot.account).copied(), cutoff))
        .cloned()
        .collect();
    live.sort_by(|a, b| {
        a.account
            .cmp(&b.account)
            .then(a.nonce.cmp(&b.nonce))
            .then(a.id.cmp(&b.id))
    });
    live
}

/// Next nonce given the highest one recorded in any status.
#[must_use]
pub const fn next_nonce(max_recorded: Option<u64>) -> u64 {
    match max_recorded {
        Some(max) => max.saturating_add(1),
        None => 0,
    }
}
