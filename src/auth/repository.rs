// Identity and refresh-session persistence
//
// The backing store is an external collaborator, so access goes through the
// `UserRepository`/`SessionRepository` traits. `PgAuthStore` is the Postgres
// implementation; `MemoryAuthStore` backs the test suite and embedded setups.
//
// Refresh tokens are persisted as SHA-256 digests, never raw: a leaked store
// dump cannot be replayed as a live token.

use crate::auth::{
    error::AuthError,
    models::{RefreshSession, Role, User},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Digest a refresh token for at-rest storage and lookup
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity record operations
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), AuthError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;
    async fn username_exists(&self, username: &str) -> Result<bool, AuthError>;
    /// Delete the identity record. Cascading removal of authored content is
    /// the backing store's concern (FK cascade in Postgres).
    async fn delete_user(&self, id: Uuid) -> Result<(), AuthError>;
}

/// Refresh-session operations. At most one live session exists per identity;
/// `save_session` replaces whatever was there before.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    /// True iff a session exists for the identity, is unexpired, and its
    /// stored digest equals `token_hash` exactly.
    async fn validate_session(&self, user_id: Uuid, token_hash: &str) -> Result<bool, AuthError>;

    /// Remove the session. Idempotent: clearing an absent session succeeds.
    async fn clear_session(&self, user_id: Uuid) -> Result<(), AuthError>;
}

/// Combined store surface the auth service is wired over. Blanket-implemented
/// so any type providing both repositories can be used as an `Arc<dyn
/// AuthStore>` trait object.
pub trait AuthStore: UserRepository + SessionRepository {}

impl<T: UserRepository + SessionRepository> AuthStore for T {}

// ============================================================================
// Postgres implementation
// ============================================================================

/// Raw row shape; `role` converts on the way out
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    avatar: Option<String>,
    followers: Vec<Uuid>,
    following: Vec<Uuid>,
    favorites: Vec<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, AuthError> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: String| AuthError::Store(e))?;
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            role,
            avatar: row.avatar,
            followers: row.followers,
            following: row.following,
            favorites: row.favorites,
            created_at: row.created_at,
        })
    }
}

/// Postgres-backed identity and session store
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, username, password_hash, role, avatar, followers, following, favorites, created_at";

#[async_trait]
impl UserRepository for PgAuthStore {
    async fn create_user(&self, user: &User) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role, avatar, followers, following, favorites, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(&user.avatar)
        .bind(&user.followers)
        .bind(&user.following)
        .bind(&user.favorites)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // Two concurrent registrations can race past the existence
            // check; the unique constraint is the backstop
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return AuthError::UsernameTaken;
                }
            }
            AuthError::Store(e.to_string())
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(username) = LOWER($1))",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SessionRepository for PgAuthStore {
    async fn save_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        // Upsert on the per-user primary key: the previous session, if any,
        // is overwritten atomically
        sqlx::query(
            "INSERT INTO refresh_sessions (user_id, token_hash, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE
             SET token_hash = EXCLUDED.token_hash,
                 expires_at = EXCLUDED.expires_at,
                 created_at = NOW()",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn validate_session(&self, user_id: Uuid, token_hash: &str) -> Result<bool, AuthError> {
        let valid: (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                 SELECT 1 FROM refresh_sessions
                 WHERE user_id = $1 AND token_hash = $2 AND expires_at > NOW()
             )",
        )
        .bind(user_id)
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(valid.0)
    }

    async fn clear_session(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory identity and session store. Backs the test suite; the same
/// trait surface as `PgAuthStore` so services and routers are store-agnostic.
#[derive(Clone, Default)]
pub struct MemoryAuthStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    sessions: Arc<RwLock<HashMap<Uuid, RefreshSession>>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryAuthStore {
    async fn create_user(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        let taken = users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username));
        if taken {
            return Err(AuthError::UsernameTaken);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AuthError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username)))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), AuthError> {
        self.users.write().await.remove(&id);
        self.sessions.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryAuthStore {
    async fn save_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.sessions.write().await.insert(
            user_id,
            RefreshSession {
                user_id,
                token_hash: token_hash.to_string(),
                expires_at,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn validate_session(&self, user_id: Uuid, token_hash: &str) -> Result<bool, AuthError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&user_id)
            .map(|s| s.token_hash == token_hash && s.expires_at > Utc::now())
            .unwrap_or(false))
    }

    async fn clear_session(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.sessions.write().await.remove(&user_id);
        Ok(())
    }
}
