//! Error types for MatForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,
    InvalidCursor,
    PayloadTooLarge,
    SuspiciousContent,

    // Resource errors (4xxx)
    NotFound,
    MaterialNotFound,
    JobNotFound,
    PriceListNotFound,

    // Conflict errors (5xxx)
    Conflict,
    DuplicateMaterial,

    // Rate limiting & load shedding (6xxx)
    RateLimited,
    BackpressureRejected,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    VectorStoreError,
    CacheError,
    TunnelError,
    BackendsUnavailable,

    // External service errors (8xxx)
    EmbeddingUnavailable,
    EmbeddingShape,

    // Enrichment errors (85xx) - surfaced per item, not per request
    UnitUnknown,
    ColorUnknown,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    Timeout,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::InvalidCursor => 1004,
            ErrorCode::PayloadTooLarge => 1005,
            ErrorCode::SuspiciousContent => 1006,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::MaterialNotFound => 4002,
            ErrorCode::JobNotFound => 4003,
            ErrorCode::PriceListNotFound => 4004,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::DuplicateMaterial => 5002,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,
            ErrorCode::BackpressureRejected => 6002,

            // Backends (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::VectorStoreError => 7003,
            ErrorCode::CacheError => 7004,
            ErrorCode::TunnelError => 7005,
            ErrorCode::BackendsUnavailable => 7006,

            // External (8xxx)
            ErrorCode::EmbeddingUnavailable => 8001,
            ErrorCode::EmbeddingShape => 8002,

            // Enrichment (85xx)
            ErrorCode::UnitUnknown => 8501,
            ErrorCode::ColorUnknown => 8502,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::Timeout => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid pagination cursor")]
    InvalidCursor,

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Request body rejected by content guard")]
    SuspiciousContent,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Material not found: {id}")]
    MaterialNotFound { id: String },

    #[error("Job not found: {request_id}")]
    JobNotFound { request_id: String },

    #[error("Price list not found for supplier: {supplier_id}")]
    PriceListNotFound { supplier_id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Conflict { message: String },

    // Rate limiting & load shedding
    #[error("Rate limit exceeded for {endpoint_class}")]
    RateLimited {
        endpoint_class: String,
        retry_after_secs: u64,
    },

    #[error("Batch queue is full, request rejected")]
    BackpressureRejected,

    // Backend errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Tunnel error: {message}")]
    Tunnel { message: String },

    #[error("All search backends unavailable")]
    BackendsUnavailable,

    // Embedding provider errors
    #[error("Embedding provider unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingShape { expected: usize, actual: usize },

    // Enrichment errors (per-item, never fail a whole batch)
    #[error("Unit could not be normalized: {raw}")]
    UnitUnknown { raw: String },

    #[error("Color could not be normalized: {raw}")]
    ColorUnknown { raw: String },

    // Timeouts
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // HTTP client
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InvalidCursor => ErrorCode::InvalidCursor,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::SuspiciousContent => ErrorCode::SuspiciousContent,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::MaterialNotFound { .. } => ErrorCode::MaterialNotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::PriceListNotFound { .. } => ErrorCode::PriceListNotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::BackpressureRejected => ErrorCode::BackpressureRejected,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::Cache { .. } => ErrorCode::CacheError,
            AppError::Tunnel { .. } => ErrorCode::TunnelError,
            AppError::BackendsUnavailable => ErrorCode::BackendsUnavailable,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::EmbeddingShape { .. } => ErrorCode::EmbeddingShape,
            AppError::UnitUnknown { .. } => ErrorCode::UnitUnknown,
            AppError::ColorUnknown { .. } => ErrorCode::ColorUnknown,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::HttpClient(_) => ErrorCode::EmbeddingUnavailable,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InvalidCursor
            | AppError::SuspiciousContent
            | AppError::UnitUnknown { .. }
            | AppError::ColorUnknown { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::MaterialNotFound { .. }
            | AppError::JobNotFound { .. }
            | AppError::PriceListNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            AppError::RateLimited { .. } | AppError::BackpressureRejected => {
                StatusCode::TOO_MANY_REQUESTS
            }

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::EmbeddingShape { .. }
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingUnavailable { .. } | AppError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            AppError::VectorStore { .. }
            | AppError::Cache { .. }
            | AppError::Tunnel { .. }
            | AppError::BackendsUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether a retry of the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Timeout { .. }
                | AppError::EmbeddingUnavailable { .. }
                | AppError::HttpClient(_)
                | AppError::Database(_)
                | AppError::DatabaseConnection { .. }
                | AppError::VectorStore { .. }
                | AppError::Cache { .. }
                | AppError::Tunnel { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let retry_after = match &self {
            AppError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                correlation_id: None, // filled by the error boundary
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache {
            message: err.to_string(),
        }
    }
}

impl From<qdrant_client::QdrantError> for AppError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        AppError::VectorStore {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::MaterialNotFound { id: "m-1".into() };
        assert_eq!(err.code(), ErrorCode::MaterialNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        let err = AppError::RateLimited {
            endpoint_class: "search".into(),
            retry_after_secs: 12,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_embedding_shape_is_server_error() {
        let err = AppError::EmbeddingShape {
            expected: 1536,
            actual: 768,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Timeout { timeout_ms: 100 }.is_transient());
        assert!(AppError::EmbeddingUnavailable {
            message: "503".into()
        }
        .is_transient());
        assert!(!AppError::UnitUnknown { raw: "шт".into() }.is_transient());
        assert!(!AppError::InvalidCursor.is_transient());
    }
}
