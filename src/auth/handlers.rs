// HTTP handlers for authentication endpoints
//
// The captcha challenge id travels in a `captcha_id` cookie set by
// GET /auth/captcha; register and login read it back from the jar, so the
// challenge is bound to the caller's session rather than the request body.

use crate::auth::{
    error::AuthError,
    middleware::{AuthenticatedUser, SharedAuthService},
    models::{
        AuthResponse, LoginRequest, MessageResponse, RefreshRequest, RefreshResponse,
        RegisterRequest, SuccessResponse, UserResponse,
    },
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use uuid::Uuid;
use validator::Validate;

/// Name of the cookie carrying the captcha challenge id
const CAPTCHA_COOKIE: &str = "captcha_id";

fn challenge_id(jar: &CookieJar) -> Option<Uuid> {
    jar.get(CAPTCHA_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// Issue a captcha challenge
/// GET /auth/captcha
#[utoipa::path(
    get,
    path = "/auth/captcha",
    responses(
        (status = 200, description = "Distorted challenge image (SVG); the challenge id is set in the captcha_id cookie")
    ),
    tag = "auth"
)]
pub async fn captcha_handler(
    State(service): State<SharedAuthService>,
    jar: CookieJar,
) -> impl IntoResponse {
    let (id, svg) = service.captcha().issue().await;

    let cookie = Cookie::build((CAPTCHA_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .build();

    (
        jar.add(cookie),
        [(header::CONTENT_TYPE, "image/svg+xml")],
        svg,
    )
}

/// Register a new user
/// POST /auth/register
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Identity created", body = MessageResponse),
        (status = 400, description = "Captcha mismatch, username taken, or invalid input")
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(service): State<SharedAuthService>,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AuthError> {
    request.validate()?;

    let user = service.register(request, challenge_id(&jar)).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: format!("Welcome aboard, {}", user.username),
        }),
    ))
}

/// Login a user
/// POST /auth/login
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Access and refresh tokens issued", body = AuthResponse),
        (status = 400, description = "Captcha mismatch"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(service): State<SharedAuthService>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    request.validate()?;

    let response = service.login(request, challenge_id(&jar)).await?;
    Ok(Json(response))
}

/// Exchange a refresh token for a new token pair
/// POST /auth/refresh
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = RefreshResponse),
        (status = 401, description = "Refresh token expired or invalid"),
        (status = 403, description = "Session revoked")
    ),
    tag = "auth"
)]
pub async fn refresh_handler(
    State(service): State<SharedAuthService>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    request.validate()?;

    let response = service.refresh(&request.refresh_token).await?;
    Ok(Json(response))
}

/// Get current user information (protected)
/// GET /auth/me
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = UserResponse),
        (status = 401, description = "Missing, invalid, or expired token")
    ),
    tag = "auth"
)]
pub async fn me_handler(
    State(service): State<SharedAuthService>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, AuthError> {
    let response = service.get_current_user(user.id).await?;
    Ok(Json(response))
}

/// Close the current session (protected)
/// POST /auth/logout
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = SuccessResponse),
        (status = 401, description = "Missing, invalid, or expired token")
    ),
    tag = "auth"
)]
pub async fn logout_handler(
    State(service): State<SharedAuthService>,
    user: AuthenticatedUser,
) -> Result<Json<SuccessResponse>, AuthError> {
    service.logout(user.id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Delete the current account (protected)
/// DELETE /auth/account
#[utoipa::path(
    delete,
    path = "/auth/account",
    responses(
        (status = 200, description = "Account deleted", body = SuccessResponse),
        (status = 401, description = "Missing, invalid, or expired token")
    ),
    tag = "auth"
)]
pub async fn delete_account_handler(
    State(service): State<SharedAuthService>,
    user: AuthenticatedUser,
) -> Result<Json<SuccessResponse>, AuthError> {
    service.delete_account(user.id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Build the /auth router over the shared service
pub fn auth_router(service: SharedAuthService) -> Router {
    Router::new()
        .route("/auth/captcha", get(captcha_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/me", get(me_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/account", delete(delete_account_handler))
        .with_state(service)
}
