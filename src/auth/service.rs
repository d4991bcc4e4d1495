// Authentication service - business logic layer
//
// Every authentication attempt runs the same pipeline: captcha, then
// credentials, then token issuance, then session persistence. A failure at
// any step rejects the attempt with a typed error; nothing later in the
// pipeline executes.

use crate::auth::{
    captcha::CaptchaService,
    error::AuthError,
    models::{AuthResponse, LoginRequest, RefreshResponse, RegisterRequest, User, UserResponse},
    password::PasswordService,
    repository::{hash_token, AuthStore, SessionRepository, UserRepository},
    token::TokenService,
};
use crate::config::AuthConfig;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Authentication service coordinating captcha, password, token, and
/// session-store operations. Generic over the store so the identity record
/// store stays an external collaborator.
pub struct AuthService<S: ?Sized> {
    store: Arc<S>,
    captcha: CaptchaService,
    tokens: TokenService,
}

/// Store-erased service handle shared across handlers
pub type SharedAuthService = Arc<AuthService<dyn AuthStore + Send + Sync>>;

impl AuthService<dyn AuthStore + Send + Sync> {
    /// Build a shared service over any store implementation; this is the
    /// form routers and extractors are wired with.
    pub fn shared<S>(store: Arc<S>, config: &AuthConfig) -> Result<SharedAuthService, AuthError>
    where
        S: AuthStore + Send + Sync + 'static,
    {
        let store: Arc<dyn AuthStore + Send + Sync> = store;
        Ok(Arc::new(AuthService::new(store, config)?))
    }
}

impl<S> AuthService<S>
where
    S: UserRepository + SessionRepository + ?Sized,
{
    /// Create a new AuthService over the given store
    pub fn new(store: Arc<S>, config: &AuthConfig) -> Result<Self, AuthError> {
        Ok(Self {
            store,
            captcha: CaptchaService::new(config),
            tokens: TokenService::new(config)?,
        })
    }

    /// The captcha service; handlers use it to issue challenges
    pub fn captcha(&self) -> &CaptchaService {
        &self.captcha
    }

    /// Register a new identity. Does not log the new user in.
    pub async fn register(
        &self,
        request: RegisterRequest,
        challenge_id: Option<Uuid>,
    ) -> Result<UserResponse, AuthError> {
        self.consume_captcha(challenge_id, &request.captcha).await?;

        if self.store.username_exists(&request.username).await? {
            return Err(AuthError::UsernameTaken);
        }

        let password_hash = PasswordService::hash_password(&request.password)?;
        let user = User::new(request.username, password_hash);
        self.store.create_user(&user).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "Registered new identity");
        Ok(user.into())
    }

    /// Authenticate credentials and open a session. Any refresh session the
    /// identity already had is overwritten: one live session per identity.
    pub async fn login(
        &self,
        request: LoginRequest,
        challenge_id: Option<Uuid>,
    ) -> Result<AuthResponse, AuthError> {
        self.consume_captcha(challenge_id, &request.captcha).await?;

        let user = self
            .store
            .find_by_username(&request.username)
            .await?
            .ok_or(AuthError::IdentityNotFound)?;

        if !PasswordService::verify_password(&request.password, &user.password_hash) {
            tracing::debug!(user_id = %user.id, "Password verification failed");
            return Err(AuthError::InvalidCredentials);
        }

        let access_token = self.tokens.issue_access_token(user.id, user.role)?;
        let refresh_token = self.open_session(user.id).await?;

        tracing::info!(user_id = %user.id, "Login successful");
        Ok(AuthResponse {
            access_token,
            refresh_token,
            user: user.into(),
        })
    }

    /// Exchange a refresh token for a new token pair. The refresh token
    /// rotates: the presented token's session is replaced, so presenting it
    /// a second time fails with `SessionRevoked`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AuthError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        let digest = hash_token(refresh_token);
        if !self.store.validate_session(claims.sub, &digest).await? {
            return Err(AuthError::SessionRevoked);
        }

        let user = self
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::IdentityNotFound)?;

        let access_token = self.tokens.issue_access_token(user.id, user.role)?;
        let new_refresh_token = self.open_session(user.id).await?;

        tracing::debug!(user_id = %user.id, "Rotated session tokens");
        Ok(RefreshResponse {
            access_token,
            refresh_token: new_refresh_token,
        })
    }

    /// Close the identity's session. Idempotent.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.clear_session(user_id).await?;
        tracing::info!(user_id = %user_id, "Logged out");
        Ok(())
    }

    /// Delete the identity: session first, then the record, so a partial
    /// failure can never leave a refreshable session behind a missing user.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.clear_session(user_id).await?;
        self.store.delete_user(user_id).await?;
        tracing::info!(user_id = %user_id, "Deleted account");
        Ok(())
    }

    /// Verify a bearer access token and load the identity it names.
    /// Used by the request extractor for every protected operation.
    pub async fn authenticate(&self, bearer_token: &str) -> Result<User, AuthError> {
        let claims = self.tokens.verify_access(bearer_token)?;

        // The identity may have been deleted after the token was issued
        self.store
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::IdentityNotFound)
    }

    /// Get current user information for an already-authenticated identity
    pub async fn get_current_user(&self, user_id: Uuid) -> Result<UserResponse, AuthError> {
        self.store
            .find_by_id(user_id)
            .await?
            .map(UserResponse::from)
            .ok_or(AuthError::IdentityNotFound)
    }

    /// Issue a refresh token and persist its session, replacing any prior one
    async fn open_session(&self, user_id: Uuid) -> Result<String, AuthError> {
        let refresh_token = self.tokens.issue_refresh_token(user_id)?;
        let expires_at = Utc::now() + Duration::seconds(self.tokens.refresh_ttl_secs());
        self.store
            .save_session(user_id, &hash_token(&refresh_token), expires_at)
            .await?;
        Ok(refresh_token)
    }

    /// Verify and consume the captcha challenge for this attempt
    async fn consume_captcha(
        &self,
        challenge_id: Option<Uuid>,
        response: &str,
    ) -> Result<(), AuthError> {
        let Some(challenge_id) = challenge_id else {
            return Err(AuthError::CaptchaMismatch);
        };
        if !self.captcha.verify(challenge_id, response).await {
            return Err(AuthError::CaptchaMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Role;
    use crate::auth::repository::MemoryAuthStore;

    fn test_config() -> AuthConfig {
        AuthConfig::with_secrets("access_secret_for_tests", "refresh_secret_for_tests")
    }

    fn test_service() -> AuthService<MemoryAuthStore> {
        AuthService::new(Arc::new(MemoryAuthStore::new()), &test_config()).unwrap()
    }

    async fn solved_captcha(service: &AuthService<MemoryAuthStore>) -> Option<Uuid> {
        Some(service.captcha().issue_known("AB12").await)
    }

    fn register_request(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            password: "Secret123".to_string(),
            captcha: "AB12".to_string(),
        }
    }

    fn login_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            captcha: "ab12".to_string(),
        }
    }

    async fn register_and_login(service: &AuthService<MemoryAuthStore>, username: &str) -> AuthResponse {
        let challenge = solved_captcha(service).await;
        service.register(register_request(username), challenge).await.unwrap();
        let challenge = solved_captcha(service).await;
        service
            .login(login_request(username, "Secret123"), challenge)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_rejects_wrong_captcha() {
        let service = test_service();
        let challenge = solved_captcha(&service).await;

        let mut request = register_request("alice");
        request.captcha = "WRONG".to_string();

        let result = service.register(request, challenge).await;
        assert!(matches!(result, Err(AuthError::CaptchaMismatch)));
    }

    #[tokio::test]
    async fn test_register_rejects_missing_challenge() {
        let service = test_service();
        let result = service.register(register_request("alice"), None).await;
        assert!(matches!(result, Err(AuthError::CaptchaMismatch)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_username() {
        let service = test_service();

        let challenge = solved_captcha(&service).await;
        service.register(register_request("alice"), challenge).await.unwrap();

        let challenge = solved_captcha(&service).await;
        let result = service.register(register_request("alice"), challenge).await;
        assert!(matches!(result, Err(AuthError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_register_does_not_open_session() {
        let service = test_service();
        let challenge = solved_captcha(&service).await;
        let user = service.register(register_request("alice"), challenge).await.unwrap();

        // No refresh session exists until the first login
        assert!(!service
            .store
            .validate_session(user.id, "anything")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let service = test_service();
        let auth = register_and_login(&service, "alice").await;

        assert_eq!(auth.user.username, "alice");
        assert!(service.authenticate(&auth.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_unknown_user_and_wrong_password_both_reject() {
        let service = test_service();
        let challenge = solved_captcha(&service).await;
        service.register(register_request("alice"), challenge).await.unwrap();

        let challenge = solved_captcha(&service).await;
        let unknown = service
            .login(login_request("nobody", "Secret123"), challenge)
            .await;
        assert!(matches!(unknown, Err(AuthError::IdentityNotFound)));

        let challenge = solved_captcha(&service).await;
        let wrong = service
            .login(login_request("alice", "WrongPass1"), challenge)
            .await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_second_login_revokes_first_refresh_token() {
        let service = test_service();
        let first = register_and_login(&service, "alice").await;

        let challenge = solved_captcha(&service).await;
        let second = service
            .login(login_request("alice", "Secret123"), challenge)
            .await
            .unwrap();

        // The first session's refresh token is still cryptographically
        // valid but no longer matches the stored session
        let replay = service.refresh(&first.refresh_token).await;
        assert!(matches!(replay, Err(AuthError::SessionRevoked)));

        assert!(service.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_the_refresh_token() {
        let service = test_service();
        let auth = register_and_login(&service, "alice").await;

        let rotated = service.refresh(&auth.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, auth.refresh_token);

        // The pre-rotation token is spent
        let replay = service.refresh(&auth.refresh_token).await;
        assert!(matches!(replay, Err(AuthError::SessionRevoked)));

        // The rotated token works
        assert!(service.refresh(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_with_garbage_token_is_invalid() {
        let service = test_service();
        let result = service.refresh("not.a.token").await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh_and_is_idempotent() {
        let service = test_service();
        let auth = register_and_login(&service, "alice").await;
        let user_id = auth.user.id;

        service.logout(user_id).await.unwrap();
        service.logout(user_id).await.unwrap();

        let result = service.refresh(&auth.refresh_token).await;
        assert!(matches!(result, Err(AuthError::SessionRevoked)));

        // The stateless access token stays valid until expiry (accepted risk)
        assert!(service.authenticate(&auth.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_account_removes_identity_and_session() {
        let service = test_service();
        let auth = register_and_login(&service, "alice").await;

        service.delete_account(auth.user.id).await.unwrap();

        let refresh = service.refresh(&auth.refresh_token).await;
        assert!(matches!(refresh, Err(AuthError::SessionRevoked)));

        // Token is signed and unexpired, but the identity is gone
        let authenticate = service.authenticate(&auth.access_token).await;
        assert!(matches!(authenticate, Err(AuthError::IdentityNotFound)));
    }

    #[tokio::test]
    async fn test_authenticate_returns_identity_with_role() {
        let service = test_service();
        let auth = register_and_login(&service, "alice").await;

        let user = service.authenticate(&auth.access_token).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_tampered_token() {
        let service = test_service();
        let auth = register_and_login(&service, "alice").await;

        let mut tampered = auth.access_token.clone();
        let last = if tampered.ends_with('x') { 'y' } else { 'x' };
        tampered.pop();
        tampered.push(last);

        let result = service.authenticate(&tampered).await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_captcha_challenge_spent_after_failed_login() {
        let service = test_service();
        let challenge = solved_captcha(&service).await;
        service.register(register_request("alice"), challenge).await.unwrap();

        // One challenge, first attempt fails on password
        let challenge = solved_captcha(&service).await;
        let wrong = service
            .login(login_request("alice", "WrongPass1"), challenge)
            .await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

        // Reusing the same challenge id now fails at the captcha step
        let retry = service
            .login(login_request("alice", "Secret123"), challenge)
            .await;
        assert!(matches!(retry, Err(AuthError::CaptchaMismatch)));
    }
}
