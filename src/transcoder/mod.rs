//! Segmented encryption transcoder: source audio in, encrypted multi-bitrate
//! HLS tree out.

mod hls;
mod key_file;
pub mod manifest;

pub use hls::{FfmpegHlsTranscoder, TranscoderSettings};
pub use key_file::KeyFileGuard;
pub use manifest::{Variant, MASTER_PLAYLIST, VARIANT_PLAYLIST};

use crate::error::ErrorKind;
use crate::keys::EncryptionKey;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub struct TranscodeRequest<'a> {
    pub source: &'a Path,
    /// Job-scoped scratch directory; output and key files go below it.
    pub work_dir: &'a Path,
    pub track_id: i64,
    pub key: &'a EncryptionKey,
    /// Written into every variant playlist's `#EXT-X-KEY` line.
    pub key_uri: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantOutput {
    pub variant: Variant,
    pub segment_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    /// Directory holding the master playlist and one subdirectory per variant.
    pub root_dir: PathBuf,
    pub variants: Vec<VariantOutput>,
    pub duration_sec: f64,
}

impl TranscodeOutput {
    pub fn master_playlist_path(&self) -> PathBuf {
        self.root_dir.join(MASTER_PLAYLIST)
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Transcoding {variant} failed: {diagnostics}")]
    Backend { variant: String, diagnostics: String },

    #[error("Transcoding timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid transcoder output: {0}")]
    InvalidOutput(String),

    #[error("Invalid transcode request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscodeError::Backend { .. } | TranscodeError::InvalidOutput(_) => {
                ErrorKind::Transcoding
            }
            TranscodeError::Timeout(_) => ErrorKind::Timeout,
            TranscodeError::InvalidRequest(_) => ErrorKind::Validation,
            TranscodeError::Io(_) => ErrorKind::Storage,
        }
    }
}

/// Produces every configured variant or nothing: on error no output
/// directory is left behind.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, request: TranscodeRequest<'_>) -> Result<TranscodeOutput, TranscodeError>;
}
