//! Unified error handling for CallHub
//!
//! A single error type covers every failure in the engine, with automatic
//! HTTP response mapping for the API layer.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// Background paths log these and move on; only the request/response
/// surfaces turn them into HTTP responses.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ==================== Call Orchestration Errors ====================
    #[error("Webhook response deadline exceeded for call {0}")]
    ProviderTimeout(String),

    #[error("Call {0} is no longer available")]
    StaleOrUnauthorized(String),

    #[error("Duplicate delivery for call {0}")]
    DuplicateDelivery(String),

    #[error("Destination lookup timed out for {0}")]
    DirectoryLookupTimeout(String),

    #[error("Persistence failed after {attempts} attempts: {message}")]
    PersistenceFailure { attempts: u32, message: String },

    #[error("Invalid transition for call {call_id}: {from} -> {to}")]
    InvalidTransition {
        call_id: String,
        from: String,
        to: String,
    },

    #[error("Unknown webhook event: {0}")]
    UnknownEvent(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    /// The provider refused the request; repeating it will not help
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) | AppError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired | AppError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }

            // 404 Not Found
            AppError::NotFound(_) | AppError::UnknownEvent(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::StaleOrUnauthorized(_)
            | AppError::DuplicateDelivery(_)
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,

            // 502/504 upstream
            AppError::Provider(_) | AppError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderTimeout(_) | AppError::DirectoryLookupTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::ProviderTimeout(_) => "provider_timeout",
            AppError::StaleOrUnauthorized(_) => "call_unavailable",
            AppError::DuplicateDelivery(_) => "duplicate_delivery",
            AppError::DirectoryLookupTimeout(_) => "directory_lookup_timeout",
            AppError::PersistenceFailure { .. } => "persistence_failure",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::UnknownEvent(_) => "unknown_event",
            AppError::Provider(_) => "provider_error",
            AppError::ProviderRejected(_) => "provider_rejected",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a retry of the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::Cache(_)
                | AppError::CacheConnection(_)
                | AppError::Provider(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::StaleOrUnauthorized("CA1".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::UnknownEvent("ringback".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::MissingField("CallSid".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::PersistenceFailure {
                attempts: 3,
                message: "down".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::StaleOrUnauthorized("CA1".to_string()).error_code(),
            "call_unavailable"
        );
        assert_eq!(
            AppError::DirectoryLookupTimeout("+15550100".to_string()).error_code(),
            "directory_lookup_timeout"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Database("conn reset".to_string()).is_transient());
        assert!(AppError::Provider("503".to_string()).is_transient());
        assert!(!AppError::ProviderRejected("404".to_string()).is_transient());
        assert_eq!(
            AppError::ProviderRejected("404".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert!(!AppError::StaleOrUnauthorized("CA1".to_string()).is_transient());
        assert!(!AppError::MissingField("CallSid".to_string()).is_transient());
    }
}
