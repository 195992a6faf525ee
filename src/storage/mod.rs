//! Object storage for uploaded sources and published HLS trees.
//!
//! Locators are relative, slash separated keys (`uploads/{job}/{file}`,
//! `hls/{track}/master.m3u8`). How they map to bytes is up to the store.

mod local;

pub use local::LocalObjectStore;

use crate::error::ErrorKind;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Lifetime advertised for upload targets.
pub const UPLOAD_TARGET_TTL_SECS: u64 = 900;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::InvalidLocator(_) => ErrorKind::Validation,
            StorageError::Io(_) => ErrorKind::Storage,
        }
    }
}

/// Where a client should send the bytes of a new upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub locator: String,
    pub url: String,
    pub expires_in: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reserves a locator for the source file of `job_id`.
    fn upload_target(&self, job_id: &str, filename: &str) -> Result<UploadTarget, StorageError>;

    /// Stores `data` at `locator`, replacing any previous object.
    async fn put(&self, locator: &str, data: &[u8]) -> Result<u64, StorageError>;

    async fn exists(&self, locator: &str) -> Result<bool, StorageError>;

    /// Copies the object at `locator` to the local file `dest`.
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Publishes every file under `src_dir` below `prefix`, atomically
    /// replacing a previous tree. Returns the prefix locator.
    async fn publish_dir(&self, src_dir: &Path, prefix: &str) -> Result<String, StorageError>;

    /// Removes every object below `prefix`. Returns whether anything existed.
    async fn remove_prefix(&self, prefix: &str) -> Result<bool, StorageError>;

    /// URL clients use to read the object.
    fn public_url(&self, locator: &str) -> String;
}
