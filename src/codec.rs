//! Text codec for arbitrary-precision amounts.
//!
//! Token quantities and gas figures are persisted as text so that 256-bit
//! values never pass through a fixed-width column. An absent value is the
//! empty string. Decoding never substitutes a default: the empty string is
//! `None`, anything unparseable is a [`DecodeError`].
//!
//! Accepted forms on decode:
//!
//! | Type          | Forms                                    |
//! |---------------|------------------------------------------|
//! | [`BigInt`]    | `-123`, `123`, `0x7b`                    |
//! | [`BigRational`] | `-3/4`, `12`, `0.75`                   |
//!
//! Encoding always produces the canonical form: base-10 integers and
//! reduced `numer/denom` fractions (just `numer` when the denominator is 1).

use num::{BigInt, BigRational, Num, One, Zero};

/// Reasons a stored text value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The text is not a number in any accepted form.
    #[error("malformed number {0:?}")]
    Malformed(String),

    /// A fraction with a zero denominator.
    #[error("zero denominator in {0:?}")]
    ZeroDenominator(String),

    /// Hex text that does not decode to bytes.
    #[error("invalid hex {0:?}")]
    InvalidHex(String),

    /// Hex text of the wrong byte length.
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength {
        /// Required byte length.
        expected: usize,
        /// Decoded byte length.
        actual: usize,
    },

    /// An enumerated column holding an unknown code.
    #[error("unknown code {0}")]
    UnknownCode(i64),
}

/// A value with a lossless text representation.
pub trait DecimalText: Sized {
    /// Renders the canonical text form.
    fn to_text(&self) -> String;

    /// Parses a non-empty text form.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if `text` is not an accepted form.
    fn from_text(text: &str) -> Result<Self, DecodeError>;
}

/// Encodes an optional value; `None` becomes the empty string.
#[must_use]
pub fn encode<T: DecimalText>(value: Option<&T>) -> String {
    value.map(DecimalText::to_text).unwrap_or_default()
}

/// Decodes a stored value; the empty string becomes `None`.
///
/// # Errors
///
/// Returns a [`DecodeError`] if `text` is non-empty and malformed.
pub fn decode<T: DecimalText>(text: &str) -> Result<Option<T>, DecodeError> {
    if text.is_empty() {
        return Ok(None);
    }
    T::from_text(text).map(Some)
}

impl DecimalText for BigInt {
    fn to_text(&self) -> String {
        self.to_str_radix(10)
    }

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        let (negative, body) = split_sign(text);
        let (radix, digits) = match body
            .strip_prefix("0x")
            .or_else(|| body.strip_prefix("0X"))
        {
            Some(hex_digits) => (16, hex_digits),
            None => (10, body),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return Err(DecodeError::Malformed(text.to_string()));
        }
        let magnitude = BigInt::from_str_radix(digits, radix)
            .map_err(|_| DecodeError::Malformed(text.to_string()))?;
        Ok(if negative { -magnitude } else { magnitude })
    }
}

impl DecimalText for BigRational {
    fn to_text(&self) -> String {
        if self.denom().is_one() {
            self.numer().to_str_radix(10)
        } else {
            format!("{}/{}", self.numer(), self.denom())
        }
    }

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        if let Some((numer, denom)) = text.split_once('/') {
            let numer = parse_decimal_int(numer, text)?;
            let denom = parse_decimal_int(denom, text)?;
            if denom.is_zero() {
                return Err(DecodeError::ZeroDenominator(text.to_string()));
            }
            return Ok(BigRational::new(numer, denom));
        }

        if let Some((whole, frac)) = text.split_once('.') {
            let (negative, whole) = split_sign(whole);
            if (whole.is_empty() && frac.is_empty())
                || !whole.chars().all(|c| c.is_ascii_digit())
                || !frac.chars().all(|c| c.is_ascii_digit())
            {
                return Err(DecodeError::Malformed(text.to_string()));
            }
            let digits = format!("{whole}{frac}");
            let numer = BigInt::from_str_radix(&digits, 10)
                .map_err(|_| DecodeError::Malformed(text.to_string()))?;
            let denom = num::pow(BigInt::from(10u8), frac.len());
            let value = BigRational::new(numer, denom);
            return Ok(if negative { -value } else { value });
        }

        parse_decimal_int(text, text).map(BigRational::from_integer)
    }
}

fn split_sign(text: &str) -> (bool, &str) {
    match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    }
}

fn parse_decimal_int(part: &str, whole_text: &str) -> Result<BigInt, DecodeError> {
    let (negative, digits) = split_sign(part);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DecodeError::Malformed(whole_text.to_string()));
    }
    let magnitude = BigInt::from_str_radix(digits, 10)
        .map_err(|_| DecodeError::Malformed(whole_text.to_string()))?;
    Ok(if negative { -magnitude } else { magnitude })
}
