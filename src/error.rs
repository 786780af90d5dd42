//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{services::payments::PaymentError, validation::ValidationError};

/// Application-wide error type.
///
/// Each variant maps to one of the HTTP status buckets the API exposes.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Missing session, expired session, wrong role
/// - **Resource Errors**: Requested resources not found or not owned by the caller
/// - **Validation / Business Errors**: Invalid input or forbidden state transitions
/// - **Payment Errors**: Messages relayed from the payment processor
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No valid session, or the session's role may not use this route.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Unauthorized")]
    Unauthorized,

    /// Requested resource does not exist or doesn't belong to the caller.
    ///
    /// Returns HTTP 404 Not Found. The string names the resource.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request body or parameters are invalid, or the requested
    /// state transition is not allowed.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// The payment processor rejected the operation.
    ///
    /// Returns HTTP 400 Bad Request with the processor's message.
    #[error("Payment error: {0}")]
    Payment(String),

    /// Too many requests from the same client.
    ///
    /// Returns HTTP 429 Too Many Requests.
    #[error("Too many requests")]
    RateLimited,

    /// Unexpected failure outside the database (hashing, serialization...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) | AppError::Payment(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for `InvalidRequest` from anything printable.
    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidRequest(message.into())
    }
}

/// Turn a unique-constraint violation into `InvalidRequest(message)`.
/// Any other database error is passed through unchanged.
pub fn on_unique_violation(err: sqlx::Error, message: &str) -> AppError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => AppError::invalid(message),
        _ => AppError::Database(err),
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidRequest(err.message)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Api(message) => AppError::Payment(message),
            PaymentError::NotConfigured => {
                AppError::Payment("Payment processing is not configured".to_string())
            }
            PaymentError::Transport(message) => AppError::Payment(message),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Internal failures are logged here and replaced by a generic message so
/// that no database detail reaches the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (code, message) = match self {
            AppError::Unauthorized => ("unauthorized", self.to_string()),
            AppError::NotFound(_) => ("not_found", self.to_string()),
            AppError::InvalidRequest(ref msg) => ("invalid_request", msg.clone()),
            AppError::Payment(ref msg) => ("payment_error", msg.clone()),
            AppError::RateLimited => ("rate_limited", self.to_string()),
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "database error while handling request");
                ("internal_error", "An internal error occurred".to_string())
            }
            AppError::Internal(ref e) => {
                tracing::error!(error = %e, "internal error while handling request");
                ("internal_error", "An internal error occurred".to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_buckets() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::NotFound("Transfer").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::invalid("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Payment("card declined".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_error_keeps_its_message() {
        let err: AppError = ValidationError::new("email", "Invalid email address").into();
        match err {
            AppError::InvalidRequest(msg) => assert_eq!(msg, "Invalid email address"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn processor_message_is_relayed() {
        let err: AppError = PaymentError::Api("Your card was declined.".into()).into();
        assert_eq!(err.to_string(), "Payment error: Your card was declined.");
    }

    #[derive(Debug)]
    struct UniqueViolation;

    impl std::fmt::Display for UniqueViolation {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"users_email_key\"")
        }
    }

    impl std::error::Error for UniqueViolation {}

    impl sqlx::error::DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some("23505".into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn duplicate_email_insert_is_a_bad_request() {
        let err = on_unique_violation(
            sqlx::Error::Database(Box::new(UniqueViolation)),
            "Email already registered",
        );
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        match err {
            AppError::InvalidRequest(msg) => assert_eq!(msg, "Email already registered"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_database_errors_stay_internal() {
        let err = on_unique_violation(sqlx::Error::RowNotFound, "Email already registered");
        assert!(matches!(err, AppError::Database(sqlx::Error::RowNotFound)));
    }

    #[tokio::test]
    async fn database_errors_are_hidden_from_clients() {
        let response = AppError::Database(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "internal_error");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }
}
