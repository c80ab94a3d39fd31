//! Errors surfaced over HTTP.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::state::ConnectionLimitError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Server at capacity. Please try again later.")]
    AtCapacity,

    #[error("Too many connections from your IP address.")]
    TooManyConnections,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            Self::TooManyConnections => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<ConnectionLimitError> for AppError {
    fn from(e: ConnectionLimitError) -> Self {
        match e {
            ConnectionLimitError::GlobalLimitReached => Self::AtCapacity,
            ConnectionLimitError::PerIpLimitReached => Self::TooManyConnections,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::NotFound("session".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ConnectionLimitError::GlobalLimitReached).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(ConnectionLimitError::PerIpLimitReached).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
