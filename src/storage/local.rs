//! Filesystem-backed object store, served by the HTTP layer under `/media`.

use super::{ObjectStore, StorageError, UploadTarget, UPLOAD_TARGET_TTL_SECS};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

const STAGING_DIR: &str = ".staging";

pub struct LocalObjectStore {
    root: PathBuf,
    /// Prepended to upload URLs, empty for server-relative URLs.
    api_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, api_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory.
    pub async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Maps a locator to a path below the root, rejecting anything that could
    /// escape it.
    fn resolve(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(locator);
        let valid = !locator.is_empty()
            && !locator.starts_with(STAGING_DIR)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Recursively copies `src` into `dest`. Blocking.
fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn upload_target(&self, job_id: &str, filename: &str) -> Result<UploadTarget, StorageError> {
        let locator = format!("uploads/{}/{}", job_id, filename);
        self.resolve(&locator)?;
        Ok(UploadTarget {
            locator,
            url: format!("{}/v1/upload/{}/data", self.api_base_url, job_id),
            expires_in: UPLOAD_TARGET_TTL_SECS,
        })
    }

    async fn put(&self, locator: &str, data: &[u8]) -> Result<u64, StorageError> {
        let path = self.resolve(locator)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write next to the target, then rename, so readers never see a
        // partial object.
        let partial = path.with_extension("partial");
        let mut file = fs::File::create(&partial).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&partial, &path).await?;

        debug!("Stored {} bytes at {}", data.len(), locator);
        Ok(data.len() as u64)
    }

    async fn exists(&self, locator: &str) -> Result<bool, StorageError> {
        let path = self.resolve(locator)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn fetch(&self, locator: &str, dest: &Path) -> Result<u64, StorageError> {
        let path = self.resolve(locator)?;
        match fs::copy(&path, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(locator.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn publish_dir(&self, src_dir: &Path, prefix: &str) -> Result<String, StorageError> {
        let dest = self.resolve(prefix)?;
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());

        let src = src_dir.to_path_buf();
        let staging_clone = staging.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &staging_clone))
            .await
            .map_err(std::io::Error::other)?;

        let copied = match copied {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                    warn!("Failed to remove staging dir {:?}: {}", staging, cleanup);
                }
                return Err(e.into());
            }
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::try_exists(&dest).await? {
            fs::remove_dir_all(&dest).await?;
        }
        fs::rename(&staging, &dest).await?;

        debug!("Published {} files under {}", copied, prefix);
        Ok(prefix.to_string())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<bool, StorageError> {
        let path = self.resolve(prefix)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path).await?,
            Ok(_) => fs::remove_file(&path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    fn public_url(&self, locator: &str) -> String {
        format!("/media/{}", locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path().join("media"), "");
        (dir, store)
    }

    #[test]
    fn test_rejects_escaping_locators() {
        let (_dir, store) = store();
        for locator in ["", "../etc/passwd", "/abs/path", "uploads/../../x", ".staging/abc"] {
            assert!(
                matches!(store.resolve(locator), Err(StorageError::InvalidLocator(_))),
                "{} should be rejected",
                locator
            );
        }
        assert!(store.resolve("uploads/job/track.wav").is_ok());
    }

    #[test]
    fn test_upload_target() {
        let store = LocalObjectStore::new("/tmp/media", "https://api.example.com/");
        let target = store.upload_target("job-1", "song.mp3").unwrap();
        assert_eq!(target.locator, "uploads/job-1/song.mp3");
        assert_eq!(target.url, "https://api.example.com/v1/upload/job-1/data");
        assert_eq!(target.expires_in, 900);
    }

    #[tokio::test]
    async fn test_put_fetch_exists() {
        let (dir, store) = store();
        store.init().await.unwrap();

        assert!(!store.exists("uploads/j/a.wav").await.unwrap());
        assert_eq!(store.put("uploads/j/a.wav", b"RIFF1234").await.unwrap(), 8);
        assert!(store.exists("uploads/j/a.wav").await.unwrap());

        let dest = dir.path().join("fetched.wav");
        assert_eq!(store.fetch("uploads/j/a.wav", &dest).await.unwrap(), 8);
        assert_eq!(std::fs::read(&dest).unwrap(), b"RIFF1234");

        assert!(matches!(
            store.fetch("uploads/j/missing.wav", &dest).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_replaces_previous_tree() {
        let (dir, store) = store();
        store.init().await.unwrap();

        let src = dir.path().join("out");
        std::fs::create_dir_all(src.join("64k")).unwrap();
        std::fs::write(src.join("master.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(src.join("64k/segment_000.ts"), "seg").unwrap();
        std::fs::write(src.join("64k/stale.ts"), "old").unwrap();

        store.publish_dir(&src, "hls/1").await.unwrap();
        assert!(store.root().join("hls/1/64k/stale.ts").exists());

        std::fs::remove_file(src.join("64k/stale.ts")).unwrap();
        let prefix = store.publish_dir(&src, "hls/1").await.unwrap();
        assert_eq!(prefix, "hls/1");
        assert!(store.root().join("hls/1/master.m3u8").exists());
        assert!(store.root().join("hls/1/64k/segment_000.ts").exists());
        assert!(!store.root().join("hls/1/64k/stale.ts").exists());

        // Staging leftovers are cleaned up by the rename
        let staging_entries = std::fs::read_dir(store.root().join(STAGING_DIR))
            .unwrap()
            .count();
        assert_eq!(staging_entries, 0);
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let (_dir, store) = store();
        store.init().await.unwrap();
        store.put("hls/3/master.m3u8", b"#EXTM3U").await.unwrap();

        assert!(store.remove_prefix("hls/3").await.unwrap());
        assert!(!store.remove_prefix("hls/3").await.unwrap());
        assert!(!store.exists("hls/3/master.m3u8").await.unwrap());
    }

    #[test]
    fn test_public_url() {
        let (_dir, store) = store();
        assert_eq!(
            store.public_url("hls/1/master.m3u8"),
            "/media/hls/1/master.m3u8"
        );
    }
}
