//! Service layer: orchestrates store access for submission workers.

pub mod ledger;

pub use ledger::SubmissionLedger;
