use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use wadmin_upstream::UpstreamError;

/// Every failure a handler can return. Rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The gateway or workflow call failed; the text is the remote message
    /// or the operation's fallback.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Blocked before any network call (nothing selected, not connected).
    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// A write that lost a race on a UNIQUE column is a conflict, not a
    /// server fault.
    pub fn from_insert(err: anyhow::Error, conflict: impl FnOnce() -> String) -> Self {
        if wadmin_db::is_unique_violation(&err) {
            Self::Conflict(conflict())
        } else {
            Self::Internal(err)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Precondition(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => error!("Internal error: {:#}", e),
            Self::Upstream(e) => warn!("Upstream failure: {}", e),
            _ => {}
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
