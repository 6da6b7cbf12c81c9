//! Ledger error types with stable numeric codes.
//!
//! [`LedgerError`] is the central error type for the ledger. Every store
//! implementation and the [`crate::service::SubmissionLedger`] report
//! failures through it, so callers can tell a missing row from corrupt
//! data or an unreachable database.

use crate::codec::DecodeError;
use crate::domain::SubmitStatus;

/// SQLSTATE reported by PostgreSQL for a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Ledger error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category          | Retry?                          |
/// |-----------|-------------------|---------------------------------|
/// | 1000–1999 | Caller mistakes   | never                           |
/// | 2000–2999 | State / Not Found | `Conflict` after a fresh nonce  |
/// | 3000–3999 | Store             | `StoreUnavailable` only         |
/// | 4000–4999 | Stored data       | never (needs repair)            |
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A lookup by id, hash or ring hash matched no row.
    #[error("not found: {0}")]
    NotFound(String),

    /// The submitter already holds a pending attempt at this nonce.
    #[error("nonce {nonce} of {miner} is already held by a pending attempt")]
    Conflict {
        /// Submitting account.
        miner: String,
        /// Contested nonce.
        nonce: u64,
    },

    /// A terminal attempt was asked to move to another status.
    #[error("attempt {id} is {from} and cannot become {to}")]
    InvalidTransition {
        /// Record id of the attempt.
        id: i64,
        /// Stored status.
        from: SubmitStatus,
        /// Requested status.
        to: SubmitStatus,
    },

    /// The caller supplied an argument the ledger refuses to store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored column could not be decoded.
    #[error("corrupt column `{column}`: {source}")]
    Corruption {
        /// Column name as stored.
        column: &'static str,
        /// Underlying decode failure.
        #[source]
        source: DecodeError,
    },

    /// The database could not be reached or timed out.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other store failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl LedgerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidArgument(_) => 1001,
            Self::NotFound(_) => 2001,
            Self::Conflict { .. } => 2002,
            Self::InvalidTransition { .. } => 2003,
            Self::Persistence(_) => 3001,
            Self::StoreUnavailable(_) => 3002,
            Self::Corruption { .. } => 4001,
        }
    }

    /// Returns `true` when repeating the operation may succeed.
    ///
    /// A `Conflict` is only worth retrying with a freshly allocated nonce.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StoreUnavailable(_))
    }

    /// Wraps a decode failure of `column` as corruption.
    #[must_use]
    pub fn corrupt(column: &'static str, source: DecodeError) -> Self {
        Self::Corruption { column, source }
    }

    /// Classifies a `sqlx` failure.
    ///
    /// `conflict` describes the (miner, nonce) slot the statement was
    /// writing, if any, and is used for unique violations.
    pub(crate) fn from_sqlx(err: sqlx::Error, conflict: Option<(&str, u64)>) -> Self {
        let classified = match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                let (miner, nonce) = conflict.unwrap_or(("", 0));
                Self::Conflict {
                    miner: miner.to_string(),
                    nonce,
                }
            }
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::StoreUnavailable(err.to_string()),
            _ => Self::Persistence(err.to_string()),
        };
        if matches!(
            classified,
            Self::StoreUnavailable(_) | Self::Persistence(_)
        ) {
            tracing::error!(error = %err, "store operation failed");
        }
        classified
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Persistence(format!("migration failed: {err}"))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_their_ranges() {
        let err = LedgerError::NotFound("ring 0x01".to_string());
        assert_eq!(err.error_code(), 2001);
        let err = LedgerError::InvalidArgument("empty error".to_string());
        assert_eq!(err.error_code(), 1001);
        let err = LedgerError::corrupt("fill_amount_s", DecodeError::Malformed("x".to_string()));
        assert_eq!(err.error_code(), 4001);
    }

    #[test]
    fn only_conflict_and_unavailable_are_retryable() {
        let conflict = LedgerError::Conflict {
            miner: "0xaa".to_string(),
            nonce: 3,
        };
        assert!(conflict.is_retryable());
        assert!(LedgerError::StoreUnavailable("timeout".to_string()).is_retryable());
        assert!(!LedgerError::NotFound("id 1".to_string()).is_retryable());
        assert!(!LedgerError::Persistence("syntax".to_string()).is_retryable());
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        let err = LedgerError::from_sqlx(sqlx::Error::PoolTimedOut, None);
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }

    #[test]
    fn row_not_found_is_not_found() {
        let err = LedgerError::from_sqlx(sqlx::Error::RowNotFound, None);
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn display_names_the_slot() {
        let err = LedgerError::Conflict {
            miner: "0xaa".to_string(),
            nonce: 7,
        };
        assert_eq!(
            err.to_string(),
            "nonce 7 of 0xaa is already held by a pending attempt"
        );
    }
}
