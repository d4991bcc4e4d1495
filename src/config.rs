// Application configuration loaded from environment variables
// All token/captcha policy knobs live here so handlers and services never
// touch the process environment directly.

use std::env;
use thiserror::Error;

/// Default access-token lifetime: 2 hours
const DEFAULT_ACCESS_TTL_SECS: i64 = 7200;

/// Default refresh-token lifetime: 7 days
const DEFAULT_REFRESH_TTL_SECS: i64 = 604_800;

/// Default captcha challenge length
const DEFAULT_CAPTCHA_LENGTH: usize = 4;

/// Default captcha charset; ambiguous glyphs (0/O, 1/I/l) are left out
const DEFAULT_CAPTCHA_CHARSET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Lifetime of an unconsumed captcha challenge
pub const CAPTCHA_TTL_SECS: i64 = 300;

/// Configuration errors detected at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ")]
    IdenticalSecrets,
}

/// Token signing and captcha policy configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret for access-token signatures
    pub access_secret: String,
    /// Secret for refresh-token signatures; must differ from `access_secret`
    /// so a leaked access secret cannot forge refresh tokens
    pub refresh_secret: String,
    /// Access-token lifetime in seconds
    pub access_ttl_secs: i64,
    /// Refresh-token lifetime in seconds
    pub refresh_ttl_secs: i64,
    /// Number of characters in a captcha challenge
    pub captcha_length: usize,
    /// Characters a captcha challenge is drawn from
    pub captcha_charset: String,
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub database_url: String,
    pub auth: AuthConfig,
}

impl Config {
    /// Load and validate configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_secret = require("ACCESS_TOKEN_SECRET")?;
        let refresh_secret = require("REFRESH_TOKEN_SECRET")?;
        if access_secret == refresh_secret {
            return Err(ConfigError::IdenticalSecrets);
        }

        let auth = AuthConfig {
            access_secret,
            refresh_secret,
            access_ttl_secs: parse_or("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?,
            refresh_ttl_secs: parse_or("REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?,
            captcha_length: parse_or("CAPTCHA_LENGTH", DEFAULT_CAPTCHA_LENGTH)?,
            captcha_charset: env::var("CAPTCHA_CHARSET")
                .unwrap_or_else(|_| DEFAULT_CAPTCHA_CHARSET.to_string()),
        };

        if auth.captcha_length == 0 {
            return Err(ConfigError::InvalidVar {
                var: "CAPTCHA_LENGTH",
                reason: "must be at least 1".to_string(),
            });
        }
        if auth.captcha_charset.is_empty() {
            return Err(ConfigError::InvalidVar {
                var: "CAPTCHA_CHARSET",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".to_string()),
            database_url: require("DATABASE_URL")?,
            auth,
        })
    }
}

impl AuthConfig {
    /// Construct a config with the given secrets and default policy values.
    /// Used by tests and embedded setups that do not read the environment.
    pub fn with_secrets(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            captcha_length: DEFAULT_CAPTCHA_LENGTH,
            captcha_charset: DEFAULT_CAPTCHA_CHARSET.to_string(),
        }
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn parse_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
