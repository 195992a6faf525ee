//! Request pipeline stage running every request through the access gateway.

use super::error::ApiError;
use super::state::ServerState;
use crate::error::ErrorKind;
use crate::gateway::{self, AccessDecision, DenyReason, Identity, Role};
use crate::quota::Caller;
use crate::server::metrics;
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, info};

pub const COOKIE_SESSION_TOKEN_KEY: &str = "session_token";
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

/// Who is calling, attached to every request that passed the gateway.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub ip: IpAddr,
    pub identity: Option<Identity>,
}

impl RequestContext {
    /// Quota identity: the user when authenticated, the address otherwise.
    pub fn caller(&self) -> Caller {
        match &self.identity {
            Some(identity) => Caller::user(identity.user_id, identity.role.tier()),
            None => Caller::anonymous(self.ip),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(&self.identity, Some(identity) if identity.role == Role::Admin)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::internal("Request did not pass the access gateway"))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(COOKIE_SESSION_TOKEN_KEY)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(HEADER_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

pub(crate) fn client_ip(request: &Request<Body>, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_ip(request.headers()) {
            return ip;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn authorize_requests(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request, state.config.trust_forwarded_for);
    let token = bearer_token(request.headers()).or_else(|| cookie_token(request.headers()));
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let authorization = match gateway::authorize(
        state.gateway.as_ref(),
        &method,
        &path,
        ip,
        token.as_deref(),
    ) {
        Ok(authorization) => authorization,
        Err(err) => return ApiError::from(err).into_response(),
    };

    match authorization.decision {
        AccessDecision::Allow => {
            request.extensions_mut().insert(RequestContext {
                ip,
                identity: authorization.identity,
            });
            next.run(request).await
        }
        AccessDecision::Deny(reason) => {
            let error = match reason {
                DenyReason::IpBlocked => {
                    metrics::record_blocked_request();
                    info!("Rejected {} {} from blocked IP {}", method, path, ip);
                    ApiError::new(ErrorKind::Forbidden, "Access denied")
                }
                DenyReason::Unauthenticated => {
                    debug!("Unauthenticated {} {} ({:?})", method, path, authorization.class);
                    ApiError::new(ErrorKind::Unauthorized, "Authentication required")
                }
                DenyReason::Forbidden => {
                    debug!("Forbidden {} {} ({:?})", method, path, authorization.class);
                    ApiError::new(ErrorKind::Forbidden, "Insufficient permissions")
                }
            };
            error.into_response()
        }
    }
}
