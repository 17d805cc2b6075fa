use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Top-level application error. Every failure inside a turn is converted to
/// one of these at the controller boundary and mapped to a single terminal
/// HTTP response (or a stream abort once streaming has begun).
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth errors ──────────────────────────────────────────────────────────
    #[error("Unauthorized")]
    Unauthorized,

    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    // ── Model / provider errors ──────────────────────────────────────────────
    #[error("Model '{id}' not found")]
    ModelNotFound { id: String },

    #[error("Invalid model configuration for '{id}': {reason}")]
    InvalidModelConfiguration { id: String, reason: String },

    #[error("Failed to construct provider for '{id}': {reason}")]
    ProviderConstructionFailed { id: String, reason: String },

    #[error("No models available")]
    NoModelsAvailable,

    #[error("Model platform unavailable at {url}")]
    PlatformUnavailable { url: String },

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    // ── Request validation errors ────────────────────────────────────────────
    #[error("No user message found")]
    NoUserMessage,

    #[error("Field '{field_name}' is missing or empty")]
    MissingField { field_name: String },

    // ── Conversation errors ──────────────────────────────────────────────────
    #[error("Chat '{id}' not found")]
    ChatNotFound { id: String },

    #[error("Record not found: {entity_type} with id '{id}'")]
    RecordNotFound { entity_type: String, id: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::ChatNotFound { .. }
                | AppError::ModelNotFound { .. }
                | AppError::RecordNotFound { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::NoUserMessage
                | AppError::MissingField { .. }
                | AppError::InvalidModelConfiguration { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ModelNotFound { .. }
            | AppError::ChatNotFound { .. }
            | AppError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidModelConfiguration { .. }
            | AppError::NoUserMessage
            | AppError::MissingField { .. } => StatusCode::BAD_REQUEST,
            AppError::NoModelsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PlatformUnavailable { .. } => StatusCode::BAD_GATEWAY,
            AppError::DatabaseQueryFailed { .. }
            | AppError::ProviderConstructionFailed { .. }
            | AppError::GenerationFailed { .. }
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::ModelNotFound { id: "m".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InvalidModelConfiguration { id: "m".into(), reason: "no uri".into() }
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NoUserMessage.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::NoModelsAvailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::GenerationFailed { message: "boom".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn predicates_classify_variants() {
        assert!(AppError::ChatNotFound { id: "c".into() }.is_not_found());
        assert!(AppError::NoUserMessage.is_validation());
        assert!(!AppError::Unauthorized.is_validation());
    }
}
