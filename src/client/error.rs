// Client-side error types

/// Errors surfaced by the session client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network-level failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server rejected the request
    #[error("api error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The session could not be kept alive; the user must log in again
    #[error("session expired, please log in again")]
    SessionExpired,

    /// An authenticated call was made with no tokens held
    #[error("not authenticated; log in first")]
    NotAuthenticated,

    /// Access-token claims could not be decoded for the expiry check
    #[error("could not decode token claims: {0}")]
    TokenDecode(String),

    /// Token storage backend failure
    #[error("token storage error: {0}")]
    Storage(String),
}
