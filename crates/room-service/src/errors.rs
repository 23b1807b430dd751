//! Room service error types.
//!
//! Internal details are logged server-side but not exposed to clients.
//! Credential failures map to `401 Unauthorized`; everything else that can
//! reach an HTTP response maps to `500`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Room service error type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Shared backend (Redis) operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// A store or bus call exceeded its time bound.
    #[error("Backend operation timed out: {operation}")]
    Timeout { operation: &'static str },

    /// Connection credential could not be resolved to an identity.
    #[error("Credential rejected: {0}")]
    Credential(#[from] CredentialError),

    /// Inbound event on an established connection could not be parsed.
    #[error("Malformed inbound event: {0}")]
    MalformedEvent(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Credential decoding failures, one variant per rejection cause.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential supplied by header or query parameter.
    #[error("Credential missing")]
    Missing,

    /// Credential exceeds the maximum accepted size.
    #[error("Credential too large: {0} bytes")]
    TooLarge(usize),

    /// Credential is not valid base64url.
    #[error("Invalid credential encoding: {0}")]
    InvalidEncoding(String),

    /// Frame ended before the named field could be read.
    #[error("Credential truncated at {0}")]
    Truncated(&'static str),

    /// IV length is not supported by the cipher.
    #[error("Unsupported IV length: {0}")]
    UnsupportedIvLength(usize),

    /// Authentication tag has the wrong length.
    #[error("Invalid authentication tag length: {0}")]
    InvalidTagLength(usize),

    /// Authenticated decryption failed (wrong key or tampered frame).
    #[error("Credential decryption failed")]
    DecryptionFailed,

    /// Plaintext is not a flat JSON object.
    #[error("Invalid credential payload: {0}")]
    InvalidPayload(String),

    /// Required identity field is absent or empty.
    #[error("Credential missing field: {0}")]
    MissingField(&'static str),
}

impl CredentialError {
    /// Bounded label for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            CredentialError::Missing => "missing",
            CredentialError::TooLarge(_) => "too_large",
            CredentialError::InvalidEncoding(_) => "invalid_encoding",
            CredentialError::Truncated(_) => "truncated",
            CredentialError::UnsupportedIvLength(_) => "unsupported_iv_length",
            CredentialError::InvalidTagLength(_) => "invalid_tag_length",
            CredentialError::DecryptionFailed => "decryption_failed",
            CredentialError::InvalidPayload(_) => "invalid_payload",
            CredentialError::MissingField(_) => "missing_field",
        }
    }
}

impl RoomError {
    /// Returns the HTTP status used when this error reaches a client.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RoomError::Credential(_) => StatusCode::UNAUTHORIZED,
            RoomError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            RoomError::Redis(_)
            | RoomError::Timeout { .. }
            | RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Credential(CredentialError::Missing) => {
                "Unauthorized: context missing".to_string()
            }
            RoomError::Credential(_) => "Unauthorized: invalid context".to_string(),
            RoomError::MalformedEvent(_) => "Malformed event".to_string(),
            RoomError::Redis(_) | RoomError::Timeout { .. } | RoomError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            RoomError::Credential(_) => "UNAUTHORIZED",
            RoomError::MalformedEvent(_) => "MALFORMED_EVENT",
            RoomError::Redis(_) | RoomError::Timeout { .. } => "BACKEND_UNAVAILABLE",
            RoomError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<redis::RedisError> for RoomError {
    fn from(err: redis::RedisError) -> Self {
        RoomError::Redis(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
