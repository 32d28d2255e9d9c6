use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use podium_core::{ErrorKind, PodiumError, SerializableError};
use serde::Serialize;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Podium(#[from] PodiumError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    error: SerializableError,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::Podium(PodiumError::NotFound(what.into()))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Podium(PodiumError::Validation(message.into()))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Podium(PodiumError::Conflict(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Podium(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Storage | ErrorKind::Network => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> SerializableError {
        match self {
            ApiError::Podium(e) => e.to_serializable(),
            ApiError::Database(_) => SerializableError {
                kind: ErrorKind::Storage,
                message: "database error".to_string(),
            },
            ApiError::BadRequest(message) => SerializableError {
                kind: ErrorKind::Validation,
                message: message.clone(),
            },
            // No dedicated kind for auth failures; clients classify on status.
            other => SerializableError {
                kind: ErrorKind::Network,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody { error: self.body() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("bad").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::conflict("busy").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::not_found("website 4").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Forbidden("not a member".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Podium(PodiumError::Storage("disk full".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_hides_database_details() {
        let err = ApiError::Database(rusqlite::Error::QueryReturnedNoRows);
        let body = err.body();
        assert_eq!(body.kind, ErrorKind::Storage);
        assert_eq!(body.message, "database error");
    }

    #[test]
    fn test_body_keeps_podium_message() {
        let body = ApiError::validation("block at position 0 is missing a type").body();
        assert_eq!(body.kind, ErrorKind::Validation);
        assert_eq!(body.message, "block at position 0 is missing a type");
    }
}
