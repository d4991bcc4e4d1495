// Identity data model and request/response DTOs
//
// Request bodies are strict: unknown or missing fields are rejected at the
// boundary instead of being read optimistically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Account role. Binary by design: everything beyond admin/user is out of
/// scope for this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity record. Social-graph and engagement edges are owned here but
/// written by external collaborators; the auth core reads them for stats only.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub followers: Vec<Uuid>,
    pub following: Vec<Uuid>,
    pub favorites: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a fresh identity for registration. Id is generated here and
    /// never changes afterwards.
    pub fn new(username: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            password_hash,
            role: Role::default(),
            avatar: None,
            followers: Vec::new(),
            following: Vec::new(),
            favorites: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Persisted refresh session: one per identity, replaced on every
/// login/rotation. The token is stored as a digest, never raw.
#[derive(Debug, Clone)]
pub struct RefreshSession {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Registration request DTO
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 20),
        custom = "crate::validation::validate_username"
    )]
    pub username: String,
    #[validate(length(min = 8))]
    pub password: String,
    #[validate(length(min = 1, max = 16))]
    pub captcha: String,
}

/// Login request DTO
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(length(min = 3, max = 20))]
    pub username: String,
    pub password: String,
    #[validate(length(min = 1, max = 16))]
    pub captcha: String,
}

/// Token refresh request DTO
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Engagement counts surfaced through /auth/me
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserStats {
    pub followers: usize,
    pub following: usize,
    pub favorites: usize,
}

/// Public view of an identity (never includes the password hash)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
    pub join_date: DateTime<Utc>,
    pub stats: UserStats,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            avatar: user.avatar,
            join_date: user.created_at,
            stats: UserStats {
                followers: user.followers.len(),
                following: user.following.len(),
                favorites: user.favorites.len(),
            },
        }
    }
}

/// Successful login response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserResponse,
}

/// Successful refresh response. Both tokens are returned because the
/// refresh token rotates on every use.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Simple message envelope (registration)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Simple success envelope (logout, account deletion)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = User::new("alice".to_string(), "$argon2id$stub".to_string());
        assert_eq!(user.role, Role::User);
        assert!(user.avatar.is_none());
        assert!(user.followers.is_empty());
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::User, Role::Admin] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn test_user_response_excludes_hash_and_counts_edges() {
        let mut user = User::new("bob".to_string(), "$argon2id$stub".to_string());
        user.followers = vec![Uuid::new_v4(), Uuid::new_v4()];
        user.favorites = vec![Uuid::new_v4()];

        let response = UserResponse::from(user);
        assert_eq!(response.stats.followers, 2);
        assert_eq!(response.stats.following, 0);
        assert_eq!(response.stats.favorites, 1);

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_register_request_rejects_unknown_fields() {
        let raw = r#"{"username":"alice","password":"Secret123","captcha":"AB12","admin":true}"#;
        assert!(serde_json::from_str::<RegisterRequest>(raw).is_err());
    }

    #[test]
    fn test_register_request_validation() {
        use validator::Validate;

        let ok = RegisterRequest {
            username: "alice_01".to_string(),
            password: "Secret123".to_string(),
            captcha: "AB12".to_string(),
        };
        assert!(ok.validate().is_ok());

        let short = RegisterRequest {
            username: "al".to_string(),
            password: "Secret123".to_string(),
            captcha: "AB12".to_string(),
        };
        assert!(short.validate().is_err());

        let bad_chars = RegisterRequest {
            username: "alice!".to_string(),
            password: "Secret123".to_string(),
            captcha: "AB12".to_string(),
        };
        assert!(bad_chars.validate().is_err());
    }
}
