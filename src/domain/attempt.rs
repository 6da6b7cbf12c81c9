//! Ring submission attempts and their result updates.

use chrono::{DateTime, Utc};
use num::BigInt;

use super::{Address, Hash, SubmitStatus};

/// One transaction-sending attempt for a ring.
///
/// Many attempts may share a `ring_hash` (resubmissions with a new gas
/// price or nonce). At most one pending attempt holds a given
/// (`miner`, `tx_nonce`) slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAttempt {
    /// Store-assigned record id (immutable).
    pub id: i64,
    /// Logical ring being submitted.
    pub ring_hash: Hash,
    /// Identifier of the ring's order set, independent of gas and nonce.
    pub unique_id: Hash,
    /// Settlement contract address.
    pub protocol_address: Address,
    /// Number of orders in the ring.
    pub orders_count: i64,
    /// Call data sent to the settlement contract.
    pub protocol_data: Vec<u8>,
    /// Gas limit of the transaction.
    pub gas_limit: Option<BigInt>,
    /// Gas price of the transaction.
    pub gas_price: Option<BigInt>,
    /// Gas consumed once mined.
    pub used_gas: Option<BigInt>,
    /// Broadcast transaction hash; `None` before broadcast.
    pub tx_hash: Option<Hash>,
    /// Account nonce consumed by this attempt.
    pub tx_nonce: u64,
    /// Lifecycle state.
    pub status: SubmitStatus,
    /// Ring index assigned by the contract once mined.
    pub ring_index: Option<BigInt>,
    /// Block the transaction was mined in.
    pub block_number: Option<BigInt>,
    /// Submitting account ("miner").
    pub miner: Address,
    /// Last failure description, if any.
    pub last_error: Option<String>,
    /// Store-assigned creation time.
    pub create_time: DateTime<Utc>,
}

/// Input for creating an attempt. The store assigns `id`, `create_time`,
/// and starts the attempt as [`SubmitStatus::Pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttempt {
    /// Logical ring being submitted.
    pub ring_hash: Hash,
    /// Identifier of the ring's order set.
    pub unique_id: Hash,
    /// Settlement contract address.
    pub protocol_address: Address,
    /// Number of orders in the ring.
    pub orders_count: i64,
    /// Call data.
    pub protocol_data: Vec<u8>,
    /// Gas limit.
    pub gas_limit: Option<BigInt>,
    /// Gas price.
    pub gas_price: Option<BigInt>,
    /// Broadcast transaction hash, when already known.
    pub tx_hash: Option<Hash>,
    /// Nonce to consume. Overwritten by
    /// [`crate::service::SubmissionLedger::submit`].
    pub tx_nonce: u64,
    /// Submitting account.
    pub miner: Address,
    /// Failure that accompanied the send, if any.
    pub last_error: Option<String>,
}

impl NewAttempt {
    /// Builds a minimal attempt for `ring_hash` sent by `miner`.
    #[must_use]
    pub fn new(ring_hash: Hash, unique_id: Hash, miner: Address) -> Self {
        Self {
            ring_hash,
            unique_id,
            protocol_address: Address::from_bytes([0u8; 20]),
            orders_count: 0,
            protocol_data: Vec::new(),
            gas_limit: None,
            gas_price: None,
            tx_hash: None,
            tx_nonce: 0,
            miner,
            last_error: None,
        }
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, tx_nonce: u64) -> Self {
        self.tx_nonce = tx_nonce;
        self
    }

    /// Sets the broadcast transaction hash.
    #[must_use]
    pub fn with_tx_hash(mut self, tx_hash: Hash) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    /// Sets gas limit and gas price.
    #[must_use]
    pub fn with_gas(mut self, gas_limit: BigInt, gas_price: BigInt) -> Self {
        self.gas_limit = Some(gas_limit);
        self.gas_price = Some(gas_price);
        self
    }
}

/// How a result update locates its attempt(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    /// Exactly the attempt with this record id.
    Id(i64),
    /// Every attempt of `ring_hash` broadcast as `tx_hash`.
    RingTx {
        /// Ring hash of the attempt.
        ring_hash: Hash,
        /// Transaction hash the worker broadcast.
        tx_hash: Hash,
    },
}

impl UpdateTarget {
    /// Prefers the record id when one is known (positive).
    #[must_use]
    pub const fn resolve(record_id: i64, ring_hash: Hash, tx_hash: Hash) -> Self {
        if record_id > 0 {
            Self::Id(record_id)
        } else {
            Self::RingTx { ring_hash, tx_hash }
        }
    }
}

/// Chain-observed outcome written atomically onto an attempt.
///
/// Every field is written, absent values as empty text, except two that
/// never clear what is stored: `tx_hash`, kept when `None` so the
/// attempt stays reachable by its broadcast hash, and `tx_nonce`, applied
/// only when strictly positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultUpdate {
    /// Attempt(s) to update.
    pub target: UpdateTarget,
    /// New status.
    pub status: SubmitStatus,
    /// Ring index reported by the contract.
    pub ring_index: Option<BigInt>,
    /// Block the transaction was mined in.
    pub block_number: Option<BigInt>,
    /// Gas consumed.
    pub used_gas: Option<BigInt>,
    /// Transaction hash observed on chain; `None` keeps the stored hash.
    pub tx_hash: Option<Hash>,
    /// Failure description; empty clears the stored error.
    pub error: String,
    /// Nonce observed on chain; zero leaves the stored nonce as is.
    pub tx_nonce: u64,
}

impl ResultUpdate {
    /// An update with no side information.
    #[must_use]
    pub const fn new(target: UpdateTarget, status: SubmitStatus) -> Self {
        Self {
            target,
            status,
            ring_index: None,
            block_number: None,
            used_gas: None,
            tx_hash: None,
            error: String::new(),
            tx_nonce: 0,
        }
    }

    /// Returns the nonce to write, if any.
    #[must_use]
    pub const fn nonce_to_apply(&self) -> Option<u64> {
        if self.tx_nonce > 0 {
            Some(self.tx_nonce)
        } else {
            None
        }
    }
}
