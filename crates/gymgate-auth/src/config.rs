//! Authentication configuration
//!
//! All tunables are read from the environment once at startup. Signing
//! secrets are mandatory outside development mode; there are no silent
//! production fallbacks.

use thiserror::Error;
use tracing::warn;

/// Development-only signing secrets. Never used unless the process runs
/// in [`Environment::Development`].
const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";

/// Configuration errors raised at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set when APP_ENV is not 'development'")]
    MissingSecret(&'static str),

    #[error("AUTH_ACCESS_TOKEN_SECRET and AUTH_REFRESH_TOKEN_SECRET must differ")]
    SharedSecret,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Parse from the `APP_ENV` variable.
    ///
    /// Only an explicit `APP_ENV=development` opts into development mode.
    /// Unset or any other value is production, so a deployment that
    /// forgets the variable cannot silently run on development secrets.
    fn from_env() -> Self {
        match std::env::var("APP_ENV").as_deref() {
            Ok("development") => Environment::Development,
            _ => Environment::Production,
        }
    }
}

/// Authentication subsystem configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Deployment environment
    pub environment: Environment,
    /// HMAC secret for access tokens
    pub access_token_secret: String,
    /// HMAC secret for refresh tokens (key separation from access tokens)
    pub refresh_token_secret: String,
    /// Access token lifetime in seconds (default: 3600 = 1 hour)
    pub access_token_ttl_secs: u64,
    /// Refresh token (and session) lifetime in days (default: 7)
    pub refresh_token_ttl_days: i64,
    /// Token issuer identifier
    pub issuer: String,
    /// Token audience identifier
    pub audience: String,
    /// Failed login attempts before lockout (default: 5)
    pub max_failed_attempts: i32,
    /// Lockout duration in minutes (default: 15)
    pub lockout_duration_mins: i64,
    /// Cookie carrying the access token for browser clients
    pub cookie_name: String,
    /// Path prefix that identifies API requests (JSON errors instead of redirects)
    pub api_prefix: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            access_token_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_token_secret: DEV_REFRESH_SECRET.to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_days: 7,
            issuer: "gymgate".to_string(),
            audience: "gymgate-clients".to_string(),
            max_failed_attempts: 5,
            lockout_duration_mins: 15,
            cookie_name: "gymgate_token".to_string(),
            api_prefix: "/api".to_string(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables.
    ///
    /// Fails if either signing secret is unset outside development mode,
    /// or if both secrets are set to the same value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();

        let access_token_secret =
            secret_from_env("AUTH_ACCESS_TOKEN_SECRET", DEV_ACCESS_SECRET, environment)?;
        let refresh_token_secret =
            secret_from_env("AUTH_REFRESH_TOKEN_SECRET", DEV_REFRESH_SECRET, environment)?;

        if access_token_secret == refresh_token_secret {
            return Err(ConfigError::SharedSecret);
        }

        Ok(Self {
            environment,
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_secs: env_parse("AUTH_ACCESS_TOKEN_TTL_SECS", 3600),
            refresh_token_ttl_days: env_parse("AUTH_REFRESH_TOKEN_TTL_DAYS", 7),
            issuer: std::env::var("AUTH_TOKEN_ISSUER").unwrap_or_else(|_| "gymgate".to_string()),
            audience: std::env::var("AUTH_TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "gymgate-clients".to_string()),
            max_failed_attempts: env_parse("AUTH_MAX_LOGIN_ATTEMPTS", 5),
            lockout_duration_mins: env_parse("AUTH_LOCKOUT_DURATION_MINS", 15),
            cookie_name: std::env::var("AUTH_COOKIE_NAME")
                .unwrap_or_else(|_| "gymgate_token".to_string()),
            api_prefix: std::env::var("AUTH_API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
        })
    }
}

fn secret_from_env(
    var: &'static str,
    dev_default: &str,
    environment: Environment,
) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => match environment {
            Environment::Development => {
                warn!(variable = var, "using development signing secret");
                Ok(dev_default.to_string())
            }
            Environment::Production => Err(ConfigError::MissingSecret(var)),
        },
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
