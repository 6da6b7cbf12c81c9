//! Submission status lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::DecodeError;

/// Lifecycle state of a submission attempt.
///
/// `Pending` moves forward to `Confirmed` or `Failed`; both are terminal.
/// A terminal attempt permanently resolves its (miner, nonce) slot, which
/// makes its nonce part of the account's watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    /// Broadcast intended or sent, outcome unknown.
    Pending,
    /// Mined successfully.
    Confirmed,
    /// Reverted, dropped or replaced.
    Failed,
}

impl SubmitStatus {
    /// Statuses that fix a nonce slot as resolved.
    pub const BLOCKING: [Self; 2] = [Self::Confirmed, Self::Failed];

    /// Returns the integer stored in the `status` column.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Pending => 1,
            Self::Confirmed => 2,
            Self::Failed => 3,
        }
    }

    /// Maps a stored integer back to a status.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownCode`] for codes outside 1..=3.
    pub const fn from_code(code: i32) -> Result<Self, DecodeError> {
        match code {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Confirmed),
            3 => Ok(Self::Failed),
            other => Err(DecodeError::UnknownCode(other as i64)),
        }
    }

    /// Returns `true` for `Confirmed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Checks whether an attempt in `self` may be updated to `next`.
    ///
    /// Pending may become anything. A terminal status only accepts itself,
    /// and that update changes nothing.
    #[must_use]
    pub fn transition(self, next: Self) -> Transition {
        match (self, next) {
            (Self::Pending, _) => Transition::Apply,
            (current, requested) if current == requested => Transition::Unchanged,
            _ => Transition::Rejected,
        }
    }
}

/// Outcome of [`SubmitStatus::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write the update.
    Apply,
    /// Repeat of a terminal update; leave the row alone.
    Unchanged,
    /// Would leave a terminal state.
    Rejected,
}

impl fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
