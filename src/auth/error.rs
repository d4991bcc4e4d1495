// Authentication error types and HTTP response conversion
//
// The `error_code` field in responses is part of the wire contract: the
// session client dispatches on it (TOKEN_EXPIRED triggers a refresh attempt,
// TOKEN_INVALID forces logout), so codes must stay stable.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

/// Authentication and session error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Captcha response did not match the issued challenge, the challenge
    /// expired, or none was issued for this session
    #[error("Captcha verification failed")]
    CaptchaMismatch,

    /// Username is already registered
    #[error("Username is already taken")]
    UsernameTaken,

    /// No identity with the given username or id exists.
    /// Surfaced to clients with the same message as `InvalidCredentials`
    /// so usernames cannot be enumerated.
    #[error("Identity not found")]
    IdentityNotFound,

    /// Password did not match the stored hash
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// No Authorization header on a protected request
    #[error("Missing authentication token")]
    MissingToken,

    /// Token signature invalid, malformed, or otherwise not ours
    #[error("Invalid token")]
    TokenInvalid,

    /// Token signature valid but past its expiry
    #[error("Token has expired")]
    TokenExpired,

    /// Refresh token cryptographically valid but no longer matches the
    /// stored session (logged out, rotated away, or replaced by a newer login)
    #[error("Session has been revoked")]
    SessionRevoked,

    /// Request body failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Password hashing failure
    #[error("Password hashing error")]
    PasswordHash,

    /// Token could not be signed
    #[error("Token generation error: {0}")]
    TokenIssue(String),
}

/// Consistent JSON error body
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "TOKEN_EXPIRED")
    pub error_code: String,
    /// Human-readable message safe to show to users
    pub message: String,
    /// ISO 8601 timestamp of when the error occurred
    pub timestamp: String,
}

impl AuthError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::CaptchaMismatch => StatusCode::BAD_REQUEST,
            AuthError::UsernameTaken => StatusCode::BAD_REQUEST,
            AuthError::IdentityNotFound => StatusCode::UNAUTHORIZED,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthError::TokenInvalid => StatusCode::UNAUTHORIZED,
            AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthError::SessionRevoked => StatusCode::FORBIDDEN,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::PasswordHash => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::TokenIssue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::CaptchaMismatch => "CAPTCHA_MISMATCH",
            AuthError::UsernameTaken => "USERNAME_TAKEN",
            AuthError::IdentityNotFound => "INVALID_CREDENTIALS",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::SessionRevoked => "SESSION_REVOKED",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Store(_) => "STORE_ERROR",
            AuthError::PasswordHash => "INTERNAL_ERROR",
            AuthError::TokenIssue(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. Internal details are filtered out here;
    /// identity-not-found collapses into the generic credentials message.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::IdentityNotFound | AuthError::InvalidCredentials => {
                "Invalid username or password".to_string()
            }
            AuthError::Store(_) | AuthError::PasswordHash | AuthError::TokenIssue(_) => {
                "An internal server error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Store(msg) => error!("Store error in auth: {}", msg),
            AuthError::PasswordHash => error!("Password hashing failed"),
            AuthError::TokenIssue(msg) => error!("Token generation failed: {}", msg),
            AuthError::TokenInvalid => warn!("Rejected token with invalid signature"),
            AuthError::SessionRevoked => warn!("Refresh attempt against a revoked session"),
            AuthError::IdentityNotFound => warn!("Authentication attempt for unknown identity"),
            other => debug!("Auth request rejected: {}", other),
        }

        let body = Json(ErrorResponse {
            error_code: self.error_code().to_string(),
            message: self.client_message(),
            timestamp: Utc::now().to_rfc3339(),
        });

        (self.status_code(), body).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Store(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthError::Validation(errors.to_string())
    }
}
