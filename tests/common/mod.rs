use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use ring_submit_ledger::domain::{Address, Hash, NewAttempt};
use ring_submit_ledger::persistence::MemorySubmissionStore;
use ring_submit_ledger::persistence::memory::Clock;
use ring_submit_ledger::service::SubmissionLedger;

/// Manually advanced clock, in whole seconds since the Unix epoch.
#[derive(Debug, Clone)]
pub struct TestClock(Arc<AtomicI64>);

#[allow(dead_code)]
impl TestClock {
    pub fn starting_at(secs: i64) -> Self {
        Self(Arc::new(AtomicI64::new(secs)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        at(self.0.load(Ordering::SeqCst))
    }

    /// Moves the clock forward and returns the new time.
    pub fn advance(&self, secs: i64) -> DateTime<Utc> {
        at(self.0.fetch_add(secs, Ordering::SeqCst) + secs)
    }

    pub fn as_clock(&self) -> Clock {
        let inner = Arc::clone(&self.0);
        Arc::new(move || at(inner.load(Ordering::SeqCst)))
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Ledger over an in-memory store stamped by `clock`, no grace period.
pub fn memory_ledger(clock: &TestClock) -> SubmissionLedger<MemorySubmissionStore> {
    let store = MemorySubmissionStore::with_clock(clock.as_clock());
    SubmissionLedger::new(Arc::new(store), chrono::Duration::zero())
}

pub fn address(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

pub fn ring(byte: u8) -> Hash {
    Hash::from_bytes([byte; 32])
}

/// Attempt of ring `ring_byte` by `miner` at `nonce`.
pub fn attempt(ring_byte: u8, miner: Address, nonce: u64) -> NewAttempt {
    NewAttempt::new(ring(ring_byte), ring(ring_byte.wrapping_add(128)), miner).with_nonce(nonce)
}
