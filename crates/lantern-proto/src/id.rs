//! Node and message identifiers.
//!
//! Both are 128 random bits rendered as 32 lower-case hex characters. A
//! node's identifier is stable per install; a message identifier is fresh per
//! envelope. The types are distinct so the two id spaces cannot be mixed up
//! in signatures, even though they share a wire representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

macro_rules! hex_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(u128);

        impl $name {
            /// Construct from raw bits.
            pub const fn from_bits(bits: u128) -> Self {
                Self(bits)
            }

            /// Construct from 16 raw bytes (big-endian).
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(u128::from_be_bytes(bytes))
            }

            /// Raw bits.
            pub const fn to_bits(self) -> u128 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:032x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:032x})"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != 32 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
                    return Err(ProtocolError::InvalidId(s.to_string()));
                }
                u128::from_str_radix(s, 16)
                    .map(Self)
                    .map_err(|_| ProtocolError::InvalidId(s.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = ProtocolError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.to_string()
            }
        }
    };
}

hex_id!(NodeId, "Stable per-install node identifier (128 random bits, hex).");
hex_id!(MsgId, "Per-envelope message identifier (128 random bits, hex).");

impl NodeId {
    /// Short display handle: `user_` plus the first 8 hex characters.
    ///
    /// Not a secure identity — purely a human-readable tag.
    pub fn pseudo_id(&self) -> String {
        let hex = self.to_string();
        format!("user_{}", &hex[..8])
    }
}

/// Derive a display handle from a raw wire peer id.
///
/// Peer ids on the wire are node ids in hex, but the hub treats them as
/// opaque strings and reserved ids like `"gateway"` appear too, so this
/// tolerates short input.
pub fn pseudo_of(peer_id: &str) -> String {
    match peer_id.get(..8) {
        Some(prefix) if peer_id.len() >= 32 => format!("user_{prefix}"),
        _ => peer_id.to_string(),
    }
}
