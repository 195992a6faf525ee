//! Mapping of component errors onto HTTP responses.

use crate::error::ErrorKind;
use crate::ingestion::{IngestionError, QueueError};
use crate::keys::KeyError;
use crate::quota::{QuotaError, QuotaStatus};
use crate::server::metrics;
use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaStatus>,
}

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    quota: Option<QuotaStatus>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            quota: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Decode => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Transcoding | ErrorKind::Storage => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind);
        let message = if self.kind == ErrorKind::Internal {
            error!("Internal error: {}", self.message);
            metrics::record_error("internal", "api");
            "Internal server error".to_string()
        } else {
            if status.is_server_error() {
                warn!("Request failed ({}): {}", self.kind, self.message);
                metrics::record_error(self.kind.as_str(), "api");
            }
            self.message
        };

        let body = ErrorResponse {
            error: message,
            kind: self.kind,
            quota: self.quota,
        };
        (status, Json(body)).into_response()
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        let kind = err.kind();
        match err {
            QuotaError::Exceeded(mut status) => {
                status.has_quota = false;
                status.remaining = Some(0.0);
                Self {
                    kind,
                    message: "Daily listening quota exceeded".to_string(),
                    quota: Some(status),
                }
            }
            other => Self::new(kind, other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}
