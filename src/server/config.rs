use super::RequestsLoggingLevel;
use std::path::PathBuf;

/// Cache policy of key delivery responses.
///
/// The two policies are mutually exclusive: keys are either cacheable by
/// anyone for a long time, or gated per request and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCachePolicy {
    #[default]
    Public,
    NoStore,
}

impl KeyCachePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "no-store" => Some(Self::NoStore),
            _ => None,
        }
    }

    /// Whether key delivery needs an authenticated caller.
    pub fn is_gated(&self) -> bool {
        *self == Self::NoStore
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Root served under `/media`.
    pub media_path: PathBuf,
    /// Prefix for absolute URLs handed to clients, empty for server-relative.
    pub api_base_url: String,
    pub key_cache_policy: KeyCachePolicy,
    pub key_max_age_secs: u64,
    /// Take the client address from `X-Forwarded-For` (behind a proxy).
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            media_path: PathBuf::from("media"),
            api_base_url: String::new(),
            key_cache_policy: KeyCachePolicy::Public,
            key_max_age_secs: 31_536_000,
            trust_forwarded_for: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_cache_policy() {
        assert_eq!(KeyCachePolicy::parse("public"), Some(KeyCachePolicy::Public));
        assert_eq!(KeyCachePolicy::parse("no-store"), Some(KeyCachePolicy::NoStore));
        assert_eq!(KeyCachePolicy::parse("private"), None);
        assert!(KeyCachePolicy::NoStore.is_gated());
        assert!(!KeyCachePolicy::Public.is_gated());
    }
}
