//! Authentication and authorization module
//!
//! Components:
//! - Password hashing (Argon2id) and strength scoring
//! - Access/refresh token codec with key separation
//! - Server-side session store with revocation and background cleanup
//! - Authentication service (login, refresh, logout, account lifecycle)
//! - Request middleware for authentication and permission gating
//! - Repository layer over the relational store

pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod session;
pub mod token;

pub use middleware::{authenticate, require_permissions, CurrentUser, PermissionMode};
pub use models::{
    CreateUserRequest, LoginRequest, LoginResponse, LogoutResponse, Permission, RefreshResponse,
    Session, User, UserPublic, UserRole, UserStatus,
};
pub use password::{
    hash_password, validate_password_strength, verify_password, PasswordError, PasswordStrength,
};
pub use repository::{
    PermissionRepository, RepositoryError, SessionRepository, UserRepository,
};
pub use service::AuthService;
pub use session::{run_sweeper, SessionContext, SessionStore, SWEEP_INTERVAL};
pub use token::{
    generate_secure_token, generate_session_id, Claims, IssuedToken, TokenCodec, TokenError,
};
