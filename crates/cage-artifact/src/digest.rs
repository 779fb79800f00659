//! Content-addressed integrity digests
//!
//! Provides [`Integrity`], a strongly-typed SHA-256 digest rendered in the
//! subresource-integrity form (`sha256-<base64>`) used both to pin agent
//! versions and to check the rewritten artifact at load time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Prefix of the only integrity algorithm we accept
pub const INTEGRITY_PREFIX: &str = "sha256-";

/// A 32-byte SHA-256 content digest
///
/// Displayed as `sha256-<base64>`, matching the `integrity` attribute of a
/// script element. Immutable and cheap to clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Integrity([u8; 32]);

impl Integrity {
    /// Create from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create digest from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IntegrityError> {
        if bytes.len() != 32 {
            return Err(IntegrityError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Compute SHA-256 of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let out = Sha256::digest(data);
        Self(out.into())
    }

    /// Base64 part of the integrity string (what a `sha256` url parameter carries)
    #[inline]
    #[must_use]
    pub fn base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Lowercase hex rendering
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        to_hex(&self.0[..8])
    }

    /// Parse the base64 digest carried by a url parameter
    ///
    /// # Errors
    /// Returns error if the value is not base64 or has the wrong length
    pub fn from_base64(value: &str) -> Result<Self, IntegrityError> {
        let bytes = STANDARD.decode(value)?;
        Self::from_slice(&bytes)
    }
}

/// Lowercase hex encoding of arbitrary bytes
#[inline]
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

impl Display for Integrity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{INTEGRITY_PREFIX}{}", self.base64())
    }
}

impl FromStr for Integrity {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(INTEGRITY_PREFIX)
            .ok_or_else(|| IntegrityError::UnsupportedAlgorithm(s.to_string()))?;
        Self::from_base64(encoded)
    }
}

impl AsRef<[u8; 32]> for Integrity {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl serde::Serialize for Integrity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Integrity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when working with integrity values
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// Invalid digest length
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Anything other than `sha256-`
    #[error("unsupported integrity algorithm: '{0}'")]
    UnsupportedAlgorithm(String),

    /// Base64 decoding error
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
