//! Per-order fill records of a ring.

use num::BigRational;

use super::Hash;
use crate::codec::DecodeError;

/// Which side of an order pays the matching fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeSelection {
    /// Fee paid in LRC.
    LrcFee,
    /// Fee taken as a share of the margin.
    MarginSplit,
}

impl FeeSelection {
    /// Returns the stored flag.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::LrcFee => 0,
            Self::MarginSplit => 1,
        }
    }

    /// Maps a stored flag back.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownCode`] for flags other than 0 and 1.
    pub const fn from_code(code: i16) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(Self::LrcFee),
            1 => Ok(Self::MarginSplit),
            other => Err(DecodeError::UnknownCode(other as i64)),
        }
    }
}

/// One order leg filled within a ring.
///
/// Belongs to the logical ring (`ring_hash`), not to a single attempt, and
/// is never modified once written. Every amount is optional: `None` means
/// the value was never computed, which is distinct from zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledOrder {
    /// Order that was filled.
    pub order_hash: Hash,
    /// Fee side.
    pub fee_selection: FeeSelection,
    /// Sell amount at the order's rate.
    pub rate_amount_s: Option<BigRational>,
    /// Sell amount still available before the fill.
    pub available_amount_s: Option<BigRational>,
    /// Buy amount still available before the fill.
    pub available_amount_b: Option<BigRational>,
    /// Filled sell amount.
    pub fill_amount_s: Option<BigRational>,
    /// Filled buy amount.
    pub fill_amount_b: Option<BigRational>,
    /// LRC reward to the order owner.
    pub lrc_reward: Option<BigRational>,
    /// LRC fee paid.
    pub lrc_fee: Option<BigRational>,
    /// Fee paid in the sell token.
    pub fee_s: Option<BigRational>,
    /// Fee valued in the legal currency.
    pub legal_fee: Option<BigRational>,
    /// Legal-currency price of the sell token.
    pub s_price: Option<BigRational>,
    /// Legal-currency price of the buy token.
    pub b_price: Option<BigRational>,
}

impl FilledOrder {
    /// A fill of `order_hash` with no amounts computed yet.
    #[must_use]
    pub const fn new(order_hash: Hash, fee_selection: FeeSelection) -> Self {
        Self {
            order_hash,
            fee_selection,
            rate_amount_s: None,
            available_amount_s: None,
            available_amount_b: None,
            fill_amount_s: None,
            fill_amount_b: None,
            lrc_reward: None,
            lrc_fee: None,
            fee_s: None,
            legal_fee: None,
            s_price: None,
            b_price: None,
        }
    }
}

/// A [`FilledOrder`] as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledOrderRecord {
    /// Store-assigned record id.
    pub id: i64,
    /// Ring the order was filled in.
    pub ring_hash: Hash,
    /// Fill details.
    pub fill: FilledOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_selection_codes() {
        assert_eq!(FeeSelection::from_code(0), Ok(FeeSelection::LrcFee));
        assert_eq!(FeeSelection::from_code(1), Ok(FeeSelection::MarginSplit));
        assert_eq!(FeeSelection::from_code(2), Err(DecodeError::UnknownCode(2)));
        assert_eq!(FeeSelection::MarginSplit.code(), 1);
    }
}
