// Authentication module
// JWT-based authentication with captcha-guarded registration and login,
// refresh-token rotation, and server-side session revocation

pub mod captcha;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod token;

// Re-export commonly used types
pub use captcha::CaptchaService;
pub use error::AuthError;
pub use handlers::auth_router;
pub use middleware::{AuthenticatedUser, SharedAuthService};
pub use models::{
    AuthResponse, LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest, Role, User,
    UserResponse,
};
pub use repository::{AuthStore, MemoryAuthStore, PgAuthStore, SessionRepository, UserRepository};
pub use service::AuthService;
pub use token::TokenService;
