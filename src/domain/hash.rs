//! Fixed-width hex identifiers.
//!
//! [`Hash`] (ring hashes, unique ids, order and transaction hashes) and
//! [`Address`] (submitters, protocol contracts) are stored as lowercase
//! `0x`-prefixed hex so that equality in SQL matches equality in Rust.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::DecodeError;

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $name([u8; $len]);

        impl $name {
            /// Byte length of this identifier.
            pub const LEN: usize = $len;

            /// Wraps raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Renders lowercase `0x`-prefixed hex.
            #[must_use]
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                let bytes =
                    hex::decode(digits).map_err(|_| DecodeError::InvalidHex(s.to_string()))?;
                let actual = bytes.len();
                let array: [u8; $len] = bytes.try_into().map_err(|_| DecodeError::WrongLength {
                    expected: $len,
                    actual,
                })?;
                Ok(Self(array))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_hex()
            }
        }

        impl TryFrom<String> for $name {
            type Error = DecodeError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

hex_id!(
    /// A 32-byte hash: ring hash, ring unique id, order hash or tx hash.
    Hash,
    32
);

hex_id!(
    /// A 20-byte account address.
    Address,
    20
);
