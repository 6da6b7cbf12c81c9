//! Row shapes of the `ring_submit_attempts` and `filled_orders` tables.
//!
//! Rows hold only text, integers and timestamps. Amounts go through
//! [`crate::codec`]; hashes and addresses are lowercase hex; an empty
//! string means "absent". Converting a row back into a domain value fails
//! with [`LedgerError::Corruption`] instead of guessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, DecodeError};
use crate::domain::{
    Address, FeeSelection, FilledOrder, FilledOrderRecord, Hash, NewAttempt, SubmissionAttempt,
    SubmitStatus,
};
use crate::error::{LedgerError, Result};

/// A stored row of `ring_submit_attempts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRow {
    /// Auto-increment row ID.
    pub id: i64,
    /// Ring hash (hex).
    pub ring_hash: String,
    /// Ring unique id (hex).
    pub unique_id: String,
    /// Settlement contract (hex).
    pub protocol_address: String,
    /// Orders in the ring.
    pub order_count: i64,
    /// Call data (`0x` hex).
    pub protocol_data: String,
    /// Gas limit (decimal text).
    pub protocol_gas: String,
    /// Gas price (decimal text).
    pub protocol_gas_price: String,
    /// Gas used (decimal text).
    pub protocol_used_gas: String,
    /// Transaction hash (hex), empty before broadcast.
    pub protocol_tx_hash: String,
    /// Account nonce.
    pub tx_nonce: i64,
    /// Status code, see [`SubmitStatus::code`].
    pub status: i32,
    /// Ring index (decimal text).
    pub ring_index: String,
    /// Block number (decimal text).
    pub block_number: String,
    /// Submitting account (hex).
    pub miner: String,
    /// Last error text.
    pub err: String,
    /// Server-side creation timestamp.
    pub create_time: DateTime<Utc>,
}

impl AttemptRow {
    /// Encodes a new pending attempt created at `create_time`. `id` is
    /// left at 0 for the store to assign.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArgument`] if the nonce does not fit
    /// the `BIGINT` column.
    pub fn from_new(attempt: &NewAttempt, create_time: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id: 0,
            ring_hash: attempt.ring_hash.to_hex(),
            unique_id: attempt.unique_id.to_hex(),
            protocol_address: attempt.protocol_address.to_hex(),
            order_count: attempt.orders_count,
            protocol_data: encode_bytes(&attempt.protocol_data),
            protocol_gas: codec::encode(attempt.gas_limit.as_ref()),
            protocol_gas_price: codec::encode(attempt.gas_price.as_ref()),
            protocol_used_gas: String::new(),
            protocol_tx_hash: attempt.tx_hash.map(|h| h.to_hex()).unwrap_or_default(),
            tx_nonce: nonce_to_column(attempt.tx_nonce)?,
            status: SubmitStatus::Pending.code(),
            ring_index: String::new(),
            block_number: String::new(),
            miner: attempt.miner.to_hex(),
            err: attempt.last_error.clone().unwrap_or_default(),
            create_time,
        })
    }

    /// Decodes the status column on its own.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Corruption`] for an unknown status code.
    pub fn status(&self) -> Result<SubmitStatus> {
        SubmitStatus::from_code(self.status).map_err(|e| LedgerError::corrupt("status", e))
    }
}

impl TryFrom<AttemptRow> for SubmissionAttempt {
    type Error = LedgerError;

    fn try_from(row: AttemptRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            ring_hash: parse_column("ring_hash", &row.ring_hash)?,
            unique_id: parse_column("unique_id", &row.unique_id)?,
            protocol_address: parse_column("protocol_address", &row.protocol_address)?,
            orders_count: row.order_count,
            protocol_data: decode_bytes(&row.protocol_data)
                .map_err(|e| LedgerError::corrupt("protocol_data", e))?,
            gas_limit: decode_column("protocol_gas", &row.protocol_gas)?,
            gas_price: decode_column("protocol_gas_price", &row.protocol_gas_price)?,
            used_gas: decode_column("protocol_used_gas", &row.protocol_used_gas)?,
            tx_hash: parse_optional_column("protocol_tx_hash", &row.protocol_tx_hash)?,
            tx_nonce: nonce_from_column(row.tx_nonce)?,
            status: row.status()?,
            ring_index: decode_column("ring_index", &row.ring_index)?,
            block_number: decode_column("block_number", &row.block_number)?,
            miner: parse_column::<Address>("miner", &row.miner)?,
            last_error: if row.err.is_empty() {
                None
            } else {
                Some(row.err)
            },
            create_time: row.create_time,
        })
    }
}

/// A stored row of `filled_orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledOrderRow {
    /// Auto-increment row ID.
    pub id: i64,
    /// Ring hash (hex).
    pub ring_hash: String,
    /// Order hash (hex).
    pub order_hash: String,
    /// Fee selection flag.
    pub fee_selection: i16,
    /// Rate sell amount (rational text).
    pub rate_amount_s: String,
    /// Available sell amount (rational text).
    pub available_amount_s: String,
    /// Available buy amount (rational text).
    pub available_amount_b: String,
    /// Filled sell amount (rational text).
    pub fill_amount_s: String,
    /// Filled buy amount (rational text).
    pub fill_amount_b: String,
    /// LRC reward (rational text).
    pub lrc_reward: String,
    /// LRC fee (rational text).
    pub lrc_fee: String,
    /// Sell-token fee (rational text).
    pub fee_s: String,
    /// Legal-currency fee (rational text).
    pub legal_fee: String,
    /// Sell-token price (rational text).
    pub s_price: String,
    /// Buy-token price (rational text).
    pub b_price: String,
}

impl FilledOrderRow {
    /// Encodes a fill of `ring_hash`; `id` is assigned by the store.
    #[must_use]
    pub fn from_fill(ring_hash: &Hash, fill: &FilledOrder) -> Self {
        Self {
            id: 0,
            ring_hash: ring_hash.to_hex(),
            order_hash: fill.order_hash.to_hex(),
            fee_selection: fill.fee_selection.code(),
            rate_amount_s: codec::encode(fill.rate_amount_s.as_ref()),
            available_amount_s: codec::encode(fill.available_amount_s.as_ref()),
            available_amount_b: codec::encode(fill.available_amount_b.as_ref()),
            fill_amount_s: codec::encode(fill.fill_amount_s.as_ref()),
            fill_amount_b: codec::encode(fill.fill_amount_b.as_ref()),
            lrc_reward: codec::encode(fill.lrc_reward.as_ref()),
            lrc_fee: codec::encode(fill.lrc_fee.as_ref()),
            fee_s: codec::encode(fill.fee_s.as_ref()),
            legal_fee: codec::encode(fill.legal_fee.as_ref()),
            s_price: codec::encode(fill.s_price.as_ref()),
            b_price: codec::encode(fill.b_price.as_ref()),
        }
    }
}

impl TryFrom<FilledOrderRow> for FilledOrderRecord {
    type Error = LedgerError;

    fn try_from(row: FilledOrderRow) -> Result<Self> {
        let fill = FilledOrder {
            order_hash: parse_column("order_hash", &row.order_hash)?,
            fee_selection: FeeSelection::from_code(row.fee_selection)
                .map_err(|e| LedgerError::corrupt("fee_selection", e))?,
            rate_amount_s: decode_column("rate_amount_s", &row.rate_amount_s)?,
            available_amount_s: decode_column("available_amount_s", &row.available_amount_s)?,
            available_amount_b: decode_column("available_amount_b", &row.available_amount_b)?,
            fill_amount_s: decode_column("fill_amount_s", &row.fill_amount_s)?,
            fill_amount_b: decode_column("fill_amount_b", &row.fill_amount_b)?,
            lrc_reward: decode_column("lrc_reward", &row.lrc_reward)?,
            lrc_fee: decode_column("lrc_fee", &row.lrc_fee)?,
            fee_s: decode_column("fee_s", &row.fee_s)?,
            legal_fee: decode_column("legal_fee", &row.legal_fee)?,
            s_price: decode_column("s_price", &row.s_price)?,
            b_price: decode_column("b_price", &row.b_price)?,
        };
        Ok(Self {
            id: row.id,
            ring_hash: parse_column("ring_hash", &row.ring_hash)?,
            fill,
        })
    }
}

/// Converts a nonce for the `BIGINT` column.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] above `i64::MAX`.
pub fn nonce_to_column(nonce: u64) -> Result<i64> {
    i64::try_from(nonce)
        .map_err(|_| LedgerError::InvalidArgument(format!("nonce {nonce} exceeds column range")))
}

/// Converts a stored nonce back.
///
/// # Errors
///
/// Returns [`LedgerError::Corruption`] for a negative value.
pub fn nonce_from_column(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| LedgerError::corrupt("tx_nonce", DecodeError::Malformed(value.to_string())))
}

fn decode_column<T: codec::DecimalText>(column: &'static str, text: &str) -> Result<Option<T>> {
    codec::decode(text).map_err(|e| LedgerError::corrupt(column, e))
}

fn parse_column<T>(column: &'static str, text: &str) -> Result<T>
where
    T: std::str::FromStr<Err = DecodeError>,
{
    text.parse().map_err(|e| LedgerError::corrupt(column, e))
}

fn parse_optional_column<T>(column: &'static str, text: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = DecodeError>,
{
    if text.is_empty() {
        return Ok(None);
    }
    parse_column(column, text).map(Some)
}

fn encode_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode_bytes(text: &str) -> std::result::Result<Vec<u8>, DecodeError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|_| DecodeError::InvalidHex(text.to_string()))
}
