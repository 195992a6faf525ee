//! Job-scoped scratch space and upload file name handling.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::warn;

/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

/// Isolated temp directory for one pipeline attempt.
///
/// Everything below it (fetched source, transcoder output, key files) is
/// deleted when the workspace drops, on every exit path.
pub struct JobWorkspace {
    job_id: String,
    dir: TempDir,
}

impl JobWorkspace {
    pub fn create(base: &Path, job_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(base)?;
        Ok(Self {
            job_id: job_id.to_string(),
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Local path for the fetched source, keeping the upload's extension.
    pub fn source_path(&self, original_filename: Option<&str>) -> PathBuf {
        let extension = original_filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .filter(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()));
        match extension {
            Some(ext) => self.dir.path().join(format!("source.{}", ext)),
            None => self.dir.path().join("source"),
        }
    }

    /// Removes the directory now. Failures are logged, never propagated.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(
                "Failed to clean up workspace {:?} of job {}: {}",
                path, self.job_id, e
            );
        }
    }
}

/// Check if a file is a supported audio format.
pub fn is_supported_audio(filename: &str) -> bool {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    ext.map(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

/// Sanitize a filename to prevent path traversal. Returns `None` for names
/// that cannot be made safe.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Get just the filename part (no path)
    let name = Path::new(filename).file_name().and_then(|n| n.to_str())?;

    // Null bytes and hidden files are never allowed
    if name.contains('\0') || name.starts_with('.') || name == ".." {
        return None;
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        return None;
    }
    Some(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_audio() {
        assert!(is_supported_audio("track.mp3"));
        assert!(is_supported_audio("track.MP3"));
        assert!(is_supported_audio("track.flac"));
        assert!(is_supported_audio("track.wav"));
        assert!(is_supported_audio("track.ogg"));
        assert!(is_supported_audio("track.m4a"));
        assert!(is_supported_audio("track.opus"));
        assert!(!is_supported_audio("track.wma"));
        assert!(!is_supported_audio("track.txt"));
        assert!(!is_supported_audio("track"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("track.mp3").as_deref(), Some("track.mp3"));
        // Path components are stripped, leaving just the filename
        assert_eq!(
            sanitize_filename("/path/to/track.mp3").as_deref(),
            Some("track.mp3")
        );
        assert_eq!(sanitize_filename("../track.mp3").as_deref(), Some("track.mp3"));
        assert_eq!(
            sanitize_filename("my track:1.mp3").as_deref(),
            Some("my_track_1.mp3")
        );

        assert!(sanitize_filename(".hidden").is_none());
        assert!(sanitize_filename("..").is_none());
        assert!(sanitize_filename("").is_none());
    }

    #[test]
    fn test_workspace_is_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let path = {
            let workspace = JobWorkspace::create(base.path(), "abc").unwrap();
            std::fs::write(workspace.source_path(Some("a.wav")), b"RIFF").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_of_same_job_are_isolated() {
        let base = TempDir::new().unwrap();
        let a = JobWorkspace::create(base.path(), "abc").unwrap();
        let b = JobWorkspace::create(base.path(), "abc").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("job-abc-"));
        a.close();
        b.close();
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_source_path_keeps_supported_extension() {
        let base = TempDir::new().unwrap();
        let workspace = JobWorkspace::create(base.path(), "abc").unwrap();
        assert!(workspace
            .source_path(Some("Song.FLAC"))
            .ends_with("source.flac"));
        assert!(workspace.source_path(Some("notes.txt")).ends_with("source"));
        assert!(workspace.source_path(None).ends_with("source"));
    }
}
