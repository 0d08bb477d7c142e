//! Persistence layer for authentication entities
//!
//! Every mutation is its own method with a fixed SQL statement; there is
//! no dynamic field-spread update surface. Counter updates that feed the
//! lockout decision are single atomic statements, never read-then-write.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::models::{Session, User, UserStatus};

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Username or email already exists")]
    DuplicateUser,
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return RepositoryError::DuplicateUser;
            }
        }
        RepositoryError::Database(err.to_string())
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, status, \
     failed_login_attempts, locked_until, last_login_at, member_id, created_at, updated_at";

/// User persistence operations
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new user. Unique constraints on username and lower(email)
    /// backstop the duplicate pre-check under concurrent inserts.
    pub async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, username, email, password_hash, role, status,
                 failed_login_attempts, locked_until, last_login_at, member_id,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.status)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.member_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up by exact username or case-insensitive email.
    pub async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR lower(email) = lower(?1)"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    /// Duplicate check run before the (expensive) password hash.
    pub async fn exists_with_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE username = ?1 OR lower(email) = lower(?2)",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Atomically increment the failed-attempt counter and return the new
    /// value. Two concurrent failures cannot under-count the lockout.
    pub async fn increment_failed_attempts(&self, user_id: Uuid) -> Result<i32, RepositoryError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users SET
                failed_login_attempts = failed_login_attempts + 1,
                updated_at = ?2
            WHERE id = ?1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or(RepositoryError::UserNotFound)
    }

    pub async fn lock_account(
        &self,
        user_id: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET locked_until = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(user_id)
            .bind(locked_until)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Reset the lockout bookkeeping and stamp the login time.
    pub async fn record_login_success(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE users SET
                failed_login_attempts = 0,
                locked_until = NULL,
                last_login_at = ?2,
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::UserNotFound);
        }
        Ok(())
    }

    pub async fn set_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(user_id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::UserNotFound);
        }
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, user_id, session_token, refresh_token, csrf_token, \
     device_info, created_at, last_used_at, expires_at, is_active";

/// Session persistence operations
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, user_id, session_token, refresh_token, csrf_token,
                 device_info, created_at, last_used_at, expires_at, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.session_token)
        .bind(&session.refresh_token)
        .bind(&session.csrf_token)
        .bind(&session.device_info)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .bind(session.expires_at)
        .bind(session.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Find a live session by its opaque token.
    pub async fn find_active_by_token(
        &self,
        session_token: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE session_token = ?1 AND is_active = 1 AND expires_at > ?2"
        ))
        .bind(session_token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Find a live session by id (token claims carry the session id).
    pub async fn find_active_by_id(
        &self,
        session_id: Uuid,
    ) -> Result<Option<Session>, RepositoryError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE id = ?1 AND is_active = 1 AND expires_at > ?2"
        ))
        .bind(session_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Stamp `last_used_at` on a validated use.
    pub async fn touch(&self, session_id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET last_used_at = ?2 WHERE id = ?1")
            .bind(session_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deactivate one session, scoped to its owner so a caller can never
    /// revoke another user's session.
    pub async fn deactivate_by_id(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0 WHERE id = ?1 AND user_id = ?2 AND is_active = 1",
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn deactivate_by_token(&self, session_token: &str) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = 0 WHERE session_token = ?1 AND is_active = 1")
                .bind(session_token)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Bulk-invalidate every active session a user owns (password change,
    /// admin deactivation).
    pub async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = 0 WHERE user_id = ?1 AND is_active = 1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Delete rows that are expired or already deactivated. Returns the
    /// number removed; zero matches is a normal outcome.
    pub async fn delete_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1 OR is_active = 0")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Role-scoped permission resolution
#[derive(Clone)]
pub struct PermissionRepository {
    pool: SqlitePool,
}

impl PermissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve the granted permission names for a role.
    pub async fn find_names_by_role(&self, role: &str) -> Result<Vec<String>, RepositoryError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT permission FROM role_permissions WHERE role = ?1 AND granted = 1",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    /// Register a permission (id by name, grouped by category).
    pub async fn insert_permission(
        &self,
        name: &str,
        category: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT OR IGNORE INTO permissions (name, category) VALUES (?1, ?2)")
            .bind(name)
            .bind(category)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Grant a permission to a role.
    pub async fn grant(&self, role: &str, permission: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role, permission, granted) VALUES (?1, ?2, 1)
            ON CONFLICT (role, permission) DO UPDATE SET granted = 1
            "#,
        )
        .bind(role)
        .bind(permission)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Withdraw a grant without deleting the row.
    pub async fn revoke(&self, role: &str, permission: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE role_permissions SET granted = 0 WHERE role = ?1 AND permission = ?2",
        )
        .bind(role)
        .bind(permission)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;
    use crate::db;

    async fn setup() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        db::init_schema(&pool).await.unwrap();
        pool
    }

    fn sample_user(username: &str, email: &str) -> User {
        User::new(
            username.to_string(),
            email.to_string(),
            "$argon2id$fake".to_string(),
            UserRole::Member,
            None,
        )
    }

    #[tokio::test]
    async fn test_insert_and_lookup_user() {
        let pool = setup().await;
        let users = UserRepository::new(pool);
        let user = sample_user("jdoe", "JDoe@Example.com");

        users.insert(&user).await.unwrap();

        let by_username = users.find_by_username_or_email("jdoe").await.unwrap();
        assert_eq!(by_username.unwrap().id, user.id);

        // Email matching is case-insensitive.
        let by_email = users
            .find_by_username_or_email("jdoe@example.com")
            .await
            .unwrap();
        assert_eq!(by_email.unwrap().id, user.id);

        // Username matching is exact.
        let wrong_case = users.find_by_username_or_email("JDOE").await.unwrap();
        assert!(wrong_case.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let pool = setup().await;
        let users = UserRepository::new(pool);

        users.insert(&sample_user("jdoe", "jdoe@example.com")).await.unwrap();

        assert!(users
            .exists_with_username_or_email("jdoe", "other@example.com")
            .await
            .unwrap());
        assert!(users
            .exists_with_username_or_email("other", "JDOE@EXAMPLE.COM")
            .await
            .unwrap());

        let dup = users.insert(&sample_user("jdoe", "new@example.com")).await;
        assert!(matches!(dup, Err(RepositoryError::DuplicateUser)));
    }

    #[tokio::test]
    async fn test_failed_attempt_counter_is_atomic_increment() {
        let pool = setup().await;
        let users = UserRepository::new(pool);
        let user = sample_user("jdoe", "jdoe@example.com");
        users.insert(&user).await.unwrap();

        for expected in 1..=5 {
            let attempts = users.increment_failed_attempts(user.id).await.unwrap();
            assert_eq!(attempts, expected);
        }

        users.record_login_success(user.id).await.unwrap();
        let reloaded = users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.failed_login_attempts, 0);
        assert!(reloaded.locked_until.is_none());
        assert!(reloaded.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let pool = setup().await;
        let users = UserRepository::new(pool.clone());
        let sessions = SessionRepository::new(pool);

        let user = sample_user("jdoe", "jdoe@example.com");
        users.insert(&user).await.unwrap();

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            session_token: "tok-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            csrf_token: "csrf-1".to_string(),
            device_info: Some("test agent".to_string()),
            created_at: now,
            last_used_at: now,
            expires_at: now + chrono::Duration::days(7),
            is_active: true,
        };
        sessions.insert(&session).await.unwrap();

        let found = sessions.find_active_by_token("tok-1").await.unwrap();
        assert!(found.is_some());

        // Revocation is scoped to the owning user.
        let other_user = Uuid::new_v4();
        assert_eq!(
            sessions.deactivate_by_id(other_user, session.id).await.unwrap(),
            0
        );
        assert_eq!(
            sessions.deactivate_by_id(user.id, session.id).await.unwrap(),
            1
        );

        assert!(sessions.find_active_by_token("tok-1").await.unwrap().is_none());

        // Inactive rows are swept.
        assert_eq!(sessions.delete_expired().await.unwrap(), 1);
        assert_eq!(sessions.delete_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_role_permission_resolution() {
        let pool = setup().await;
        let perms = PermissionRepository::new(pool);

        perms.insert_permission("reports.view", "reports").await.unwrap();
        perms.insert_permission("users.create", "users").await.unwrap();
        perms.grant("admin", "reports.view").await.unwrap();
        perms.grant("admin", "users.create").await.unwrap();
        perms.grant("trainer", "reports.view").await.unwrap();

        let admin = perms.find_names_by_role("admin").await.unwrap();
        assert_eq!(admin.len(), 2);

        let trainer = perms.find_names_by_role("trainer").await.unwrap();
        assert_eq!(trainer, vec!["reports.view".to_string()]);

        // Withdrawn grants stop resolving.
        perms.revoke("trainer", "reports.view").await.unwrap();
        assert!(perms.find_names_by_role("trainer").await.unwrap().is_empty());

        assert!(perms.find_names_by_role("member").await.unwrap().is_empty());
    }
}
