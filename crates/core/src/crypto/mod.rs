//! Hashing helpers for Mirror
//!
//! Poll votes are stored under a salted digest of the voter id rather than
//! the id itself, so a ballot can be replaced by its author but the stored
//! votes do not reveal who cast them.

use std::fmt;
use sha2::{Digest, Sha256};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Error types for hashing operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Error during hashing or hash decoding
    #[error("Hashing error: {0}")]
    HashingError(String),
}

/// Result type for hashing operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// A hash value
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub Vec<u8>);

impl Hash {
    /// Create a new Hash from bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the bytes of the hash
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert hash to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Create a hash from a hex string
    pub fn from_hex(hex_str: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::HashingError(format!("Invalid hex: {}", e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the SHA-256 digest of some bytes
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().to_vec())
}

/// Digest of `salt` followed by `id`, used to key anonymous votes
pub fn anonymize(salt: &str, id: &str) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    Hash(hasher.finalize().to_vec())
}
