//! Path based route classification.

use super::models::RouteClass;
use axum::http::Method;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TRACK_RE: Regex = Regex::new(r"^/v1/tracks/\d+$").unwrap();
    static ref TRACK_SIMILAR_RE: Regex = Regex::new(r"^/v1/tracks/\d+/similar$").unwrap();
    static ref TRACK_STREAM_RE: Regex = Regex::new(r"^/v1/tracks/\d+/stream$").unwrap();
    static ref KEY_RE: Regex = Regex::new(r"^/v1/keys/\d+$").unwrap();
}

fn has_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

#[derive(Debug, Clone, Copy)]
pub struct RouteRules {
    /// Key delivery requires an identity (`no-store` policy) instead of
    /// being public (long-cache policy).
    key_delivery_gated: bool,
}

impl RouteRules {
    pub fn new(key_delivery_gated: bool) -> Self {
        Self { key_delivery_gated }
    }

    /// Unknown routes need an identity.
    pub fn classify(&self, method: &Method, path: &str) -> RouteClass {
        if path == "/" || has_prefix(path, "/media") {
            return RouteClass::Public;
        }

        if KEY_RE.is_match(path) {
            return if self.key_delivery_gated {
                RouteClass::Authenticated
            } else {
                RouteClass::Public
            };
        }

        if TRACK_RE.is_match(path) {
            return match *method {
                Method::GET | Method::HEAD => RouteClass::Public,
                _ => RouteClass::Admin,
            };
        }
        if TRACK_SIMILAR_RE.is_match(path) {
            return RouteClass::Public;
        }
        if TRACK_STREAM_RE.is_match(path) || has_prefix(path, "/v1/listen") {
            return RouteClass::OptionalAuth;
        }

        if has_prefix(path, "/v1/upload") || has_prefix(path, "/v1/admin") {
            return RouteClass::Admin;
        }

        RouteClass::Authenticated
    }
}
