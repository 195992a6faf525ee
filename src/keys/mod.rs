//! Key custody: per-track AES-128 keys used for HLS segment encryption.
//!
//! Raw key bytes leave this module only through [`KeyCustodian::get_raw`],
//! which is called by the transcoding step and the key delivery endpoint.

mod store;

pub use store::SqliteKeyCustodian;

use crate::error::ErrorKind;
use anyhow::Result;
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;

pub const KEY_LENGTH: usize = 16;

/// Exactly 16 bytes of key material.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LENGTH]);

impl EncryptionKey {
    /// 16 bytes from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for EncryptionKey {
    type Error = KeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Encryption key must be exactly {} bytes, got {0}", KEY_LENGTH)]
    InvalidLength(usize),

    #[error("Track {0} already has an encryption key")]
    AlreadyExists(i64),

    #[error("No encryption key for track {0}")]
    NotFound(i64),

    #[error("Key store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::InvalidLength(_) => ErrorKind::Validation,
            KeyError::AlreadyExists(_) => ErrorKind::Conflict,
            KeyError::NotFound(_) => ErrorKind::NotFound,
            KeyError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Key metadata, safe to expose to administrators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub track_id: i64,
    /// Changes on every rotation, used as the delivery ETag.
    pub key_id: String,
    pub created_at: i64,
    pub rotated_at: Option<i64>,
}

pub trait KeyCustodian: Send + Sync {
    /// Generates and stores a key for a track that doesn't have one yet.
    fn issue(&self, track_id: i64) -> Result<String, KeyError>;

    fn get_raw(&self, track_id: i64) -> Result<EncryptionKey, KeyError>;

    fn get_record(&self, track_id: i64) -> Result<Option<KeyRecord>, KeyError>;

    /// Replaces the track key. Rejects anything but 16 bytes, leaving the
    /// stored key untouched. Returns the new key id.
    fn rotate(&self, track_id: i64, new_key: &[u8]) -> Result<String, KeyError>;

    fn delete(&self, track_id: i64) -> Result<bool, KeyError>;
}
