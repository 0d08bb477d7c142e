//! gymgate-auth - session-based authentication and authorization
//!
//! The auth subsystem of the GymGate backend: password hashing and
//! strength scoring, a signed access/refresh token codec, a server-side
//! session store with revocation and background cleanup, login lockout,
//! role-derived permission gating, audit/security logging, rate limiting,
//! and CSRF protection. Route handlers and the member data layer live in
//! sibling crates; this crate owns only the auth tables and middleware.

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod state;

pub use audit::{ActivityEntry, AuditLogger, RequestContext, SecurityEvent, Severity};
pub use auth::AuthService;
pub use config::{AuthConfig, ConfigError, Environment};
pub use error::{AuthError, ErrorBody};
pub use state::AuthState;
