//! Shared application state for the middleware stack

use sqlx::SqlitePool;

use crate::audit::AuditLogger;
use crate::auth::service::AuthService;
use crate::config::AuthConfig;

/// State handed to the auth middleware via `from_fn_with_state`.
#[derive(Clone)]
pub struct AuthState {
    pub service: AuthService,
    pub audit: AuditLogger,
    pub config: AuthConfig,
}

impl AuthState {
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Self {
        Self {
            service: AuthService::new(pool.clone(), config.clone()),
            audit: AuditLogger::new(pool),
            config,
        }
    }
}
