//! Domain layer: attempts, fills, statuses and hex identifiers.
//!
//! These types carry amounts as [`num::BigInt`] / [`num::BigRational`] and
//! know nothing about how they are stored; see [`crate::persistence`] for
//! the text-column mapping.

pub mod attempt;
pub mod filled_order;
pub mod hash;
pub mod status;

pub use attempt::{NewAttempt, ResultUpdate, SubmissionAttempt, UpdateTarget};
pub use filled_order::{FeeSelection, FilledOrder, FilledOrderRecord};
pub use hash::{Address, Hash};
pub use status::{SubmitStatus, Transition};
