//! # ring-submit-ledger
//!
//! Bookkeeping for ring settlement transactions submitted by a relay.
//!
//! The ledger records every transaction-sending attempt for a ring,
//! tracks its status, and answers the questions a submitter asks on every
//! cycle: which pending attempts are still live, whether a slot was already
//! resubmitted, and which nonce to use next. Signing, broadcasting and
//! resubmission policy live outside this crate.
//!
//! ## Architecture
//!
//! ```text
//! Submission workers
//!     │
//!     ├── SubmissionLedger (service/)      per-account nonce locks
//!     │
//!     ├── nonce watermark + allocation (nonce)
//!     │
//!     ├── SubmissionStore (persistence/)
//!     │       ├── PostgreSQL (sqlx)
//!     │       └── in-memory
//!     │
//!     └── decimal text codec (codec)
//! ```

pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod nonce;
pub mod persistence;
pub mod service;
pub mod telemetry;

pub use error::{LedgerError, Result};
