// Session-maintaining HTTP client
//
// An explicit client abstraction: application code depends on this struct
// rather than on an ambient, monkey-patched transport. It attaches the bearer
// token to every outgoing request, turns expired-token 401s into a single
// refresh-then-retry, keeps concurrent 401s from stampeding the refresh
// endpoint, and proactively refreshes tokens that are close to expiry.

use crate::auth::models::{
    AuthResponse, LoginRequest, MessageResponse, RefreshRequest, RefreshResponse, RegisterRequest,
    SuccessResponse, UserResponse,
};
use crate::client::{
    error::ClientError,
    storage::{TokenPair, TokenStorage},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{header, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};

/// How often the background monitor inspects the access token
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Refresh proactively once expiry is within this window
const EXPIRY_LEAD_SECS: i64 = 15 * 60;

/// After a failed refresh, further 401-triggered refreshes are suppressed
/// for this long so many failing requests produce one notice, not a storm
const REFRESH_FAILURE_COOLDOWN: Duration = Duration::from_secs(5);

/// Current session state, observable by the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session or a healthy one; requests proceed normally
    Active,
    /// The session could not be kept alive; `notice` is the user-facing
    /// explanation to show before redirecting to login
    Expired { notice: String },
}

/// Error body shape returned by the API; tolerant of non-JSON bodies
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

/// Only claim the advisory expiry check needs
#[derive(Deserialize)]
struct ExpClaim {
    exp: i64,
}

/// HTTP client that owns the session lifecycle for a signed-in user
pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    storage: Arc<dyn TokenStorage>,
    /// Working copy of the stored pair
    tokens: RwLock<Option<TokenPair>>,
    /// Single-flight guard: at most one refresh call per "refresh needed"
    /// event; tasks that 401 mid-refresh wait here and reuse the result
    refresh_gate: Mutex<()>,
    last_refresh_failure: std::sync::Mutex<Option<Instant>>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionClient {
    /// Create a client against `base_url`, loading any persisted tokens.
    /// The cookie store carries the captcha session cookie between
    /// `fetch_captcha` and the subsequent register/login call.
    pub fn new(
        base_url: impl Into<String>,
        storage: Arc<dyn TokenStorage>,
    ) -> Result<Arc<Self>, ClientError> {
        let initial = storage.load()?;
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        let (status_tx, _) = watch::channel(SessionStatus::Active);

        Ok(Arc::new(Self {
            http,
            base_url: base_url.into(),
            storage,
            tokens: RwLock::new(initial),
            refresh_gate: Mutex::new(()),
            last_refresh_failure: std::sync::Mutex::new(None),
            status_tx,
        }))
    }

    /// Watch session state changes (forced logouts surface here)
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// The access token currently held, if any
    pub async fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    // ========================================================================
    // Auth endpoints
    // ========================================================================

    /// Fetch a captcha challenge image. The challenge id cookie is kept in
    /// the client's cookie store for the follow-up register/login call.
    pub async fn fetch_captcha(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .get(format!("{}/auth/captcha", self.base_url))
            .send()
            .await?;
        expect_text(response).await
    }

    /// Register a new account; does not sign in
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        captcha: &str,
    ) -> Result<MessageResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/register", self.base_url))
            .json(&RegisterRequest {
                username: username.to_string(),
                password: password.to_string(),
                captcha: captcha.to_string(),
            })
            .send()
            .await?;
        expect_json(response).await
    }

    /// Sign in and install the returned token pair
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        captcha: &str,
    ) -> Result<UserResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
                captcha: captcha.to_string(),
            })
            .send()
            .await?;

        let auth: AuthResponse = expect_json(response).await?;
        self.install_tokens(&TokenPair {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
        })
        .await?;

        if let Ok(mut failure) = self.last_refresh_failure.lock() {
            *failure = None;
        }
        self.status_tx.send_replace(SessionStatus::Active);

        tracing::info!(username = %auth.user.username, "Signed in");
        Ok(auth.user)
    }

    /// Fetch the current user's profile
    pub async fn me(&self) -> Result<UserResponse, ClientError> {
        if self.tokens.read().await.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        let response = self.request(Method::GET, "/auth/me").await?;
        expect_json(response).await
    }

    /// Sign out: best-effort server-side session clear, then drop local
    /// tokens. Sent outside the interceptor on purpose: an intentional
    /// sign-out must never trigger refresh machinery or an "expired" notice.
    /// Local state is cleared even when the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Some(token) = self.access_token().await {
            let result = self
                .send_once(Method::POST, "/auth/logout", None::<&()>, Some(&token))
                .await;
            if let Err(err) = result {
                tracing::warn!("Server-side logout failed: {}", err);
            }
        }
        self.clear_local_tokens().await;
        if let Ok(mut failure) = self.last_refresh_failure.lock() {
            *failure = None;
        }
        Ok(())
    }

    /// Delete the signed-in account and drop local tokens
    pub async fn delete_account(&self) -> Result<(), ClientError> {
        if self.tokens.read().await.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        let response = self.request(Method::DELETE, "/auth/account").await?;
        let _: SuccessResponse = expect_json(response).await?;
        self.clear_local_tokens().await;
        Ok(())
    }

    // ========================================================================
    // Intercepted transport
    // ========================================================================

    /// Send a body-less request through the session interceptor
    pub async fn request(&self, method: Method, path: &str) -> Result<Response, ClientError> {
        self.execute(method, path, None::<&()>).await
    }

    /// Send a JSON request through the session interceptor
    pub async fn request_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, ClientError> {
        self.execute(method, path, Some(body)).await
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        let observed = self.access_token().await;
        let response = self
            .send_once(method.clone(), path, body, observed.as_deref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        // A 401 on an unauthenticated call has nothing to refresh
        let Some(observed) = observed else {
            return Ok(response);
        };

        let error = read_error_body(response).await;
        if error.error_code == "TOKEN_INVALID" {
            // Forged or corrupted token: no retry can help
            self.force_logout("Your session is no longer valid, please log in again.")
                .await;
            return Err(ClientError::SessionExpired);
        }

        let fresh = match self.refresh_access(&observed).await {
            Ok(token) => token,
            Err(err) => {
                tracing::debug!("Refresh after 401 failed: {}", err);
                self.force_logout("Your session has expired, please log in again.")
                    .await;
                return Err(ClientError::SessionExpired);
            }
        };

        // Retry the original request exactly once with the new token
        self.send_once(method, path, body, Some(&fresh)).await
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        access_token: Option<&str>,
    ) -> Result<Response, ClientError> {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = access_token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    // ========================================================================
    // Refresh coordination
    // ========================================================================

    /// Refresh the access token, single-flight. `observed` is the token the
    /// caller saw fail: if a refresh completed while waiting for the gate,
    /// the already-rotated token is returned without a second network call.
    async fn refresh_access(&self, observed: &str) -> Result<String, ClientError> {
        let _gate = self.refresh_gate.lock().await;

        match self.access_token().await {
            Some(current) if current != observed => return Ok(current),
            None => return Err(ClientError::SessionExpired),
            _ => {}
        }

        if self.in_failure_cooldown() {
            return Err(ClientError::SessionExpired);
        }

        let refresh_token = {
            let tokens = self.tokens.read().await;
            tokens
                .as_ref()
                .map(|pair| pair.refresh_token.clone())
                .ok_or(ClientError::SessionExpired)?
        };

        let result: Result<RefreshResponse, ClientError> = async {
            let response = self
                .http
                .post(format!("{}/auth/refresh", self.base_url))
                .json(&RefreshRequest { refresh_token })
                .send()
                .await?;
            expect_json(response).await
        }
        .await;

        match result {
            Ok(rotated) => {
                let pair = TokenPair {
                    access_token: rotated.access_token.clone(),
                    refresh_token: rotated.refresh_token,
                };
                self.install_tokens(&pair).await?;
                tracing::debug!("Session tokens refreshed");
                Ok(rotated.access_token)
            }
            Err(err) => {
                tracing::warn!("Token refresh failed: {}", err);
                if let Ok(mut failure) = self.last_refresh_failure.lock() {
                    *failure = Some(Instant::now());
                }
                Err(err)
            }
        }
    }

    fn in_failure_cooldown(&self) -> bool {
        match self.last_refresh_failure.lock() {
            Ok(guard) => guard
                .map(|at| at.elapsed() < REFRESH_FAILURE_COOLDOWN)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    // ========================================================================
    // Proactive expiry monitoring
    // ========================================================================

    /// Spawn the background expiry monitor. Abort the returned handle to
    /// tear monitoring down (logout also makes its ticks no-ops by clearing
    /// the tokens).
    pub fn spawn_expiry_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                client.expiry_tick().await;
            }
        })
    }

    /// One monitor pass: refresh in the background when the access token is
    /// inside the expiry lead window. Failures here only warn; the token
    /// may still be valid for a while, so nobody gets logged out.
    async fn expiry_tick(&self) {
        let Some(pair) = self.tokens.read().await.clone() else {
            return;
        };

        let exp = match decode_expiry(&pair.access_token) {
            Ok(exp) => exp,
            Err(err) => {
                tracing::warn!("Could not inspect access token expiry: {}", err);
                return;
            }
        };

        let remaining = exp - chrono::Utc::now().timestamp();
        if remaining > EXPIRY_LEAD_SECS {
            return;
        }

        tracing::debug!(remaining_secs = remaining, "Access token near expiry, refreshing");
        if let Err(err) = self.refresh_access(&pair.access_token).await {
            tracing::warn!("Background token refresh failed: {}", err);
        }
    }

    // ========================================================================
    // Token bookkeeping
    // ========================================================================

    async fn install_tokens(&self, pair: &TokenPair) -> Result<(), ClientError> {
        self.storage.save(pair)?;
        *self.tokens.write().await = Some(pair.clone());
        Ok(())
    }

    async fn clear_local_tokens(&self) {
        *self.tokens.write().await = None;
        if let Err(err) = self.storage.clear() {
            tracing::warn!("Could not clear token storage: {}", err);
        }
    }

    /// Irrecoverable session failure: drop all tokens and surface an
    /// explicit notice. Never a silent redirect.
    async fn force_logout(&self, notice: &str) {
        self.clear_local_tokens().await;
        self.status_tx.send_replace(SessionStatus::Expired {
            notice: notice.to_string(),
        });
        tracing::warn!("Forced logout: {}", notice);
    }
}

/// Decode the `exp` claim without verifying the signature. Advisory only:
/// the server re-verifies everything, the client just schedules refreshes.
fn decode_expiry(token: &str) -> Result<i64, ClientError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<ExpClaim>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .map_err(|e| ClientError::TokenDecode(e.to_string()))
}

async fn read_error_body(response: Response) -> ErrorBody {
    response.json::<ErrorBody>().await.unwrap_or_default()
}

async fn expect_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if response.status().is_success() {
        return Ok(response.json::<T>().await?);
    }
    Err(api_error(response).await)
}

async fn expect_text(response: Response) -> Result<String, ClientError> {
    if response.status().is_success() {
        return Ok(response.text().await?);
    }
    Err(api_error(response).await)
}

async fn api_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = read_error_body(response).await;
    ClientError::Api {
        status,
        code: body.error_code,
        message: body.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Role;
    use crate::auth::token::TokenService;
    use crate::client::storage::MemoryTokenStorage;
    use axum::{
        extract::State,
        http::{header as axum_header, HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Test backend state: counts refresh calls, controls refresh outcome
    #[derive(Clone)]
    struct Backend {
        refresh_calls: Arc<AtomicUsize>,
        refresh_succeeds: Arc<std::sync::atomic::AtomicBool>,
        /// 401 error code /protected answers with for stale tokens
        reject_code: &'static str,
    }

    fn unauthorized(code: &str) -> axum::response::Response {
        (
            AxumStatus::UNAUTHORIZED,
            Json(json!({ "error_code": code, "message": "rejected" })),
        )
            .into_response()
    }

    async fn protected(State(backend): State<Backend>, headers: HeaderMap) -> axum::response::Response {
        let bearer = headers
            .get(axum_header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        if bearer == "fresh-access" {
            Json(json!({ "ok": true })).into_response()
        } else {
            unauthorized(backend.reject_code)
        }
    }

    async fn refresh(State(backend): State<Backend>) -> axum::response::Response {
        backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the in-flight window so concurrent 401 handlers overlap
        tokio::time::sleep(Duration::from_millis(50)).await;
        if backend.refresh_succeeds.load(Ordering::SeqCst) {
            Json(json!({
                "access_token": "fresh-access",
                "refresh_token": "fresh-refresh"
            }))
            .into_response()
        } else {
            (
                AxumStatus::FORBIDDEN,
                Json(json!({ "error_code": "SESSION_REVOKED", "message": "revoked" })),
            )
                .into_response()
        }
    }

    async fn spawn_backend(reject_code: &'static str, refresh_succeeds: bool) -> (String, Backend) {
        let backend = Backend {
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            refresh_succeeds: Arc::new(std::sync::atomic::AtomicBool::new(refresh_succeeds)),
            reject_code,
        };
        let app = Router::new()
            .route("/protected", get(protected))
            .route("/auth/refresh", post(refresh))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (base_url, backend)
    }

    fn stale_client(base_url: &str) -> Arc<SessionClient> {
        let storage = Arc::new(MemoryTokenStorage::with_tokens(TokenPair {
            access_token: "stale-access".to_string(),
            refresh_token: "stale-refresh".to_string(),
        }));
        SessionClient::new(base_url, storage).unwrap()
    }

    #[tokio::test]
    async fn test_expired_401_triggers_refresh_and_single_retry() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", true).await;
        let client = stale_client(&base_url);

        let response = client.request(Method::GET, "/protected").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);

        // Both tokens were rotated
        assert_eq!(client.access_token().await.as_deref(), Some("fresh-access"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", true).await;
        let client = stale_client(&base_url);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.request(Method::GET, "/protected").await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        // Exactly one refresh call despite five concurrent 401s
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_token_forces_logout_without_refresh() {
        let (base_url, backend) = spawn_backend("TOKEN_INVALID", true).await;
        let client = stale_client(&base_url);
        let mut status = client.subscribe();

        let result = client.request(Method::GET, "/protected").await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));

        // No refresh was even attempted
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(client.access_token().await.is_none());

        status.changed().await.unwrap();
        let notice = match status.borrow().clone() {
            SessionStatus::Expired { notice } => notice,
            other => panic!("expected expired status, got {:?}", other),
        };
        assert!(notice.contains("log in again"));
    }

    #[tokio::test]
    async fn test_refresh_failure_forces_logout_with_notice() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", false).await;
        let client = stale_client(&base_url);
        let mut status = client.subscribe();

        let result = client.request(Method::GET, "/protected").await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(client.access_token().await.is_none());

        status.changed().await.unwrap();
        assert!(matches!(
            status.borrow().clone(),
            SessionStatus::Expired { .. }
        ));
    }

    #[tokio::test]
    async fn test_failure_cooldown_suppresses_repeat_refreshes() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", false).await;
        let client = stale_client(&base_url);

        let _ = client.request(Method::GET, "/protected").await;
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);

        // Re-arm tokens as if another tab still held them; the cooldown
        // keeps the next 401 from re-entering refresh immediately
        client
            .install_tokens(&TokenPair {
                access_token: "stale-access".to_string(),
                refresh_token: "stale-refresh".to_string(),
            })
            .await
            .unwrap();

        let result = client.request(Method::GET, "/protected").await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    }

    fn real_token(ttl_secs: i64) -> String {
        let mut config = crate::config::AuthConfig::with_secrets(
            "access_secret_for_tests",
            "refresh_secret_for_tests",
        );
        config.access_ttl_secs = ttl_secs;
        TokenService::new(&config)
            .unwrap()
            .issue_access_token(Uuid::new_v4(), Role::User)
            .unwrap()
    }

    #[tokio::test]
    async fn test_expiry_tick_refreshes_tokens_near_expiry() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", true).await;

        let storage = Arc::new(MemoryTokenStorage::with_tokens(TokenPair {
            access_token: real_token(300), // expires within the lead window
            refresh_token: "stale-refresh".to_string(),
        }));
        let client = SessionClient::new(&base_url, storage).unwrap();

        client.expiry_tick().await;

        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.access_token().await.as_deref(), Some("fresh-access"));
    }

    #[tokio::test]
    async fn test_expiry_tick_skips_distant_expiry() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", true).await;

        let storage = Arc::new(MemoryTokenStorage::with_tokens(TokenPair {
            access_token: real_token(7200),
            refresh_token: "stale-refresh".to_string(),
        }));
        let client = SessionClient::new(&base_url, storage).unwrap();

        client.expiry_tick().await;

        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expiry_tick_failure_is_soft() {
        let (base_url, backend) = spawn_backend("TOKEN_EXPIRED", false).await;

        let near_expiry = real_token(300);
        let storage = Arc::new(MemoryTokenStorage::with_tokens(TokenPair {
            access_token: near_expiry.clone(),
            refresh_token: "stale-refresh".to_string(),
        }));
        let client = SessionClient::new(&base_url, storage).unwrap();
        let status = client.subscribe();

        client.expiry_tick().await;

        // A failed background refresh warns but never logs the user out
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.access_token().await, Some(near_expiry));
        assert_eq!(*status.borrow(), SessionStatus::Active);
    }

    #[test]
    fn test_decode_expiry_reads_unverified_claims() {
        let token = real_token(1234);
        let exp = decode_expiry(&token).unwrap();
        let remaining = exp - chrono::Utc::now().timestamp();
        assert!((1200..=1234).contains(&remaining));

        assert!(decode_expiry("not-a-jwt").is_err());
    }
}
