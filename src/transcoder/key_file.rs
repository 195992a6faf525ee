//! Scoped on-disk key material for the transcoding backend.

use crate::keys::EncryptionKey;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const KEY_FILE: &str = "enc.key";
const KEY_INFO_FILE: &str = "enc.keyinfo";

/// Key file plus ffmpeg key-info file, living in a private temp dir.
///
/// The directory is removed when the guard drops, which covers success,
/// backend errors and cancellation of the owning future alike.
pub struct KeyFileGuard {
    dir: TempDir,
}

impl KeyFileGuard {
    pub fn create(parent: &Path, key: &EncryptionKey, key_uri: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("key-").tempdir_in(parent)?;

        let key_path = dir.path().join(KEY_FILE);
        let mut file = private_file(&key_path)?;
        file.write_all(key.as_bytes())?;
        file.sync_all()?;

        // Without an IV line ffmpeg derives a unique IV per segment from the
        // media sequence number.
        let info = format!("{}\n{}\n", key_uri, key_path.display());
        std::fs::write(dir.path().join(KEY_INFO_FILE), info)?;

        Ok(Self { dir })
    }

    pub fn key_info_path(&self) -> PathBuf {
        self.dir.path().join(KEY_INFO_FILE)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the key material now, reporting failures.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

#[cfg(unix)]
fn private_file(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}
