//! Error classification shared by every component.
//!
//! Components keep their own `thiserror` enums; each of them can be folded
//! into an [`ErrorKind`], which decides both retry behavior in the ingestion
//! pipeline and the HTTP status code at the server boundary.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input (wrong key length, empty locator, bad position...).
    Validation,
    /// Unknown job, track, session or key.
    NotFound,
    /// No identity where one is required.
    Unauthorized,
    /// Identity present but not allowed, or caller IP blocked.
    Forbidden,
    /// Daily listening allowance exhausted.
    QuotaExceeded,
    /// Operation conflicts with the current state (e.g. job already running).
    Conflict,
    /// Source bytes are not decodable audio.
    Decode,
    /// Transcoding backend failed.
    Transcoding,
    /// Object store or local storage failure.
    Storage,
    /// An external call exceeded its time budget.
    Timeout,
    /// Temporarily out of capacity; the caller may retry later.
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// Whether the ingestion pipeline should retry the step that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Decode | ErrorKind::Transcoding | ErrorKind::Storage | ErrorKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Decode => "decode",
            ErrorKind::Transcoding => "transcoding",
            ErrorKind::Storage => "storage",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Decode.is_transient());
        assert!(ErrorKind::Transcoding.is_transient());
        assert!(ErrorKind::Storage.is_transient());
        assert!(ErrorKind::Timeout.is_transient());

        assert!(!ErrorKind::Validation.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
        assert!(!ErrorKind::Conflict.is_transient());
        assert!(!ErrorKind::Internal.is_transient());
        assert!(!ErrorKind::Unavailable.is_transient());
    }
}
