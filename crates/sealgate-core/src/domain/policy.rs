//! Encryption policy and EncryptionId.
//!
//! The EncryptionId is `policy_id bytes || nonce`. It is the only identifier
//! threading the artifact, the ciphertext and the approval call together, and
//! it is embedded in the encrypted object so it can be recovered on download.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{LEDGER_ID_LENGTH, ObjectId};

/// Nonce length of a report policy.
pub const DEFAULT_NONCE_LEN: usize = 5;

/// `policy_id || nonce`, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EncryptionId(Vec<u8>);

impl EncryptionId {
    pub fn new(policy_id: &ObjectId, nonce: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(LEDGER_ID_LENGTH + nonce.len());
        bytes.extend_from_slice(policy_id.as_bytes());
        bytes.extend_from_slice(nonce);
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(digits).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// The policy object this id is bound to, if the id is long enough to carry one.
    pub fn policy_id(&self) -> Option<ObjectId> {
        let prefix: [u8; LEDGER_ID_LENGTH] = self.0.get(..LEDGER_ID_LENGTH)?.try_into().ok()?;
        Some(ObjectId::from_bytes(prefix))
    }

    /// Whether this id starts with the bytes of `policy_id`.
    pub fn has_prefix(&self, policy_id: &ObjectId) -> bool {
        self.0.starts_with(policy_id.as_bytes())
    }
}

impl fmt::Display for EncryptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EncryptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionId({})", self.to_hex())
    }
}

impl Serialize for EncryptionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EncryptionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Policy under which one artifact is encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionPolicy {
    /// On-ledger object controlling who may obtain key shares.
    pub policy_id: ObjectId,
    pub nonce: Vec<u8>,
    /// Minimum number of key servers that must release a share.
    pub threshold: u8,
}

impl EncryptionPolicy {
    pub fn new(policy_id: ObjectId, nonce: Vec<u8>, threshold: u8) -> Self {
        Self {
            policy_id,
            nonce,
            threshold,
        }
    }

    /// Policy with a fresh random nonce of `nonce_len` bytes.
    pub fn generate(policy_id: ObjectId, threshold: u8, nonce_len: usize) -> Self {
        let nonce: Vec<u8> = (0..nonce_len).map(|_| rand::random::<u8>()).collect();
        Self::new(policy_id, nonce, threshold)
    }

    pub fn encryption_id(&self) -> EncryptionId {
        EncryptionId::new(&self.policy_id, &self.nonce)
    }
}
