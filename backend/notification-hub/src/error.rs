use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::{RecipientId, SessionHandle};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    /// A session handle was claimed by a second recipient.
    #[error("session {session} is bound to {owner}, cannot be claimed by {claimed_by}")]
    InvalidSession {
        session: SessionHandle,
        owner: RecipientId,
        claimed_by: RecipientId,
    },

    /// The session handle has already disconnected and cannot be reused.
    #[error("session {0} has already disconnected")]
    SessionRetired(SessionHandle),

    /// The persistence collaborator rejected or failed the write.
    #[error("notification store unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("registry is shutting down")]
    ShuttingDown,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::InvalidSession { .. } | AppError::SessionRetired(_) => 409,
            AppError::PersistenceUnavailable(_) | AppError::ShuttingDown => 503,
            AppError::Config(_) | AppError::Database(_) => 500,
        }
    }

    /// Stable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidSession { .. } => "INVALID_SESSION",
            AppError::SessionRetired(_) => "SESSION_RETIRED",
            AppError::PersistenceUnavailable(_) => "PERSISTENCE_UNAVAILABLE",
            AppError::ShuttingDown => "SHUTTING_DOWN",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "success": false,
            "code": self.code(),
            "error": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(AppError::ShuttingDown.status_code(), 503);
        assert_eq!(
            AppError::PersistenceUnavailable("down".into()).status_code(),
            503
        );
        assert_eq!(
            AppError::InvalidSession {
                session: SessionHandle::new(),
                owner: RecipientId::new(),
                claimed_by: RecipientId::new(),
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn test_error_response_body() {
        let err = AppError::PersistenceUnavailable("connection refused".into());
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
