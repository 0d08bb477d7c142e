//! Data models for authentication and authorization
//!
//! - User: account identity and login security state
//! - Session: one authenticated device/context, independently revocable
//! - Permission: named capability grouped by category
//!
//! Users are never physically deleted; deletion sets status to inactive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User role
///
/// Permissions are resolved per role, not per user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Trainer,
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Trainer => "trainer",
            UserRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "trainer" => Some(UserRole::Trainer),
            "member" => Some(UserRole::Member),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account status
///
/// Inactive is the soft-deleted state; locked accounts additionally carry
/// a `locked_until` timestamp on the user row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Locked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Locked => "locked",
        }
    }
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Unique login name (matched case-sensitively)
    pub username: String,

    /// Unique email (matched case-insensitively)
    pub email: String,

    /// Argon2id PHC string; never serialized in API responses
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role: UserRole,

    pub status: UserStatus,

    /// Consecutive failed login attempts
    pub failed_login_attempts: i32,

    /// Login suppressed until this time, when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,

    /// Weak reference into the member entity of the excluded data layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        role: UserRole,
        member_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            role,
            status: UserStatus::Active,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            member_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account is currently under a login lockout.
    pub fn is_locked(&self) -> bool {
        match self.locked_until {
            Some(locked_until) => Utc::now() < locked_until,
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Public representation without credential material.
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            status: self.status,
            member_id: self.member_id,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
        }
    }
}

/// User representation safe for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One authenticated device/context
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,

    pub user_id: Uuid,

    /// Opaque token identifying this session (32 hex chars)
    #[serde(skip_serializing)]
    pub session_token: String,

    /// Refresh token bound to this session
    #[serde(skip_serializing)]
    pub refresh_token: String,

    /// CSRF token issued with this session
    #[serde(skip_serializing)]
    pub csrf_token: String,

    /// Free-form device description (user agent, IP)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Updated on each validated use
    pub last_used_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    pub is_active: bool,
}

impl Session {
    /// A session is valid iff it is active and unexpired.
    pub fn is_valid(&self) -> bool {
        self.is_active && Utc::now() < self.expires_at
    }
}

/// Named capability, grouped for display (e.g. `reports.view`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub name: String,
    pub category: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
}

/// Successful login response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub csrf_token: String,
    /// Opaque token the client presents on logout
    pub session_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserPublic,
}

/// Token refresh response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Logout response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub sessions_invalidated: u64,
}

/// User creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_conversion() {
        assert_eq!(UserRole::Admin.as_str(), "admin");
        assert_eq!(UserRole::parse("TRAINER"), Some(UserRole::Trainer));
        assert_eq!(UserRole::parse("owner"), None);
    }

    #[test]
    fn test_user_lock_state() {
        let mut user = User::new(
            "jdoe".to_string(),
            "jdoe@example.com".to_string(),
            "hash".to_string(),
            UserRole::Member,
            None,
        );

        assert!(!user.is_locked());
        assert!(user.is_active());

        user.locked_until = Some(Utc::now() + chrono::Duration::minutes(15));
        assert!(user.is_locked());

        // A lapsed lockout no longer blocks login.
        user.locked_until = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(!user.is_locked());
    }

    #[test]
    fn test_session_validity() {
        let now = Utc::now();
        let mut session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            csrf_token: "csrf".to_string(),
            device_info: None,
            created_at: now,
            last_used_at: now,
            expires_at: now + chrono::Duration::days(7),
            is_active: true,
        };

        assert!(session.is_valid());

        session.is_active = false;
        assert!(!session.is_valid());

        session.is_active = true;
        session.expires_at = now - chrono::Duration::seconds(1);
        assert!(!session.is_valid());
    }

    #[test]
    fn test_public_view_hides_credentials() {
        let user = User::new(
            "jdoe".to_string(),
            "jdoe@example.com".to_string(),
            "secret-hash".to_string(),
            UserRole::Admin,
            None,
        );

        let json = serde_json::to_string(&user.to_public()).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("password_hash"));
    }
}
