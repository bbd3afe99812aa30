//! Content hashes.
//!
//! Archives name buckets by the SHA-256 of their uncompressed contents and
//! use the all-zero hash on the wire to mean "no bucket here". [`Hash256`]
//! keeps that wire form; code that needs "maybe a bucket" goes through
//! [`Hash256::non_zero`] instead of comparing against zero by hand.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash, the wire sentinel for "absent".
    pub const ZERO: Self = Self([0u8; 32]);

    /// SHA-256 of arbitrary data.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// SHA-256 of the XDR encoding of `value`.
    pub fn hash_xdr<T: stellar_xdr::curr::WriteXdr>(
        value: &T,
    ) -> Result<Self, stellar_xdr::curr::Error> {
        let bytes = value.to_xdr(stellar_xdr::curr::Limits::none())?;
        Ok(Self::hash(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }

    /// Lowercase 64-character hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// `None` for the zero sentinel, otherwise the hash itself.
    pub fn non_zero(self) -> Option<Self> {
        (!self.is_zero()).then_some(self)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<stellar_xdr::curr::Hash> for Hash256 {
    fn from(hash: stellar_xdr::curr::Hash) -> Self {
        Self(hash.0)
    }
}

impl From<Hash256> for stellar_xdr::curr::Hash {
    fn from(hash: Hash256) -> Self {
        stellar_xdr::curr::Hash(hash.0)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Accepts the 64-hex form, and an empty string as the zero hash.
impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Hash256::ZERO);
        }
        Hash256::from_hex(&s).map_err(de::Error::custom)
    }
}
