// Authentication middleware for protected routes

use crate::auth::error::AuthError;
use crate::auth::models::Role;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use uuid::Uuid;

pub use crate::auth::service::SharedAuthService;

/// Authenticated identity extractor for protected routes.
///
/// Verifies the bearer access token and loads the identity it names; the
/// request is rejected before any handler logic runs when the header is
/// missing, the token fails verification, or the identity no longer exists
/// (deleted after the token was issued).
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<SharedAuthService> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &SharedAuthService,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::TokenInvalid)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::TokenInvalid)?;

        let user = service.authenticate(token).await?;

        Ok(AuthenticatedUser {
            id: user.id,
            username: user.username,
            role: user.role,
        })
    }
}
