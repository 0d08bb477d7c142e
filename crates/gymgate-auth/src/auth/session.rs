//! Session store adapter
//!
//! Tracks one row per authenticated device/context. A session is valid
//! iff it is active and unexpired; validation touches `last_used_at`.
//! Absence is a normal outcome (`Ok(None)`), not an error.
//!
//! Expired and deactivated rows are removed by a background sweeper owned
//! by the process lifecycle, not by this module's constructor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::models::{Session, User};
use super::repository::{RepositoryError, SessionRepository, UserRepository};
use super::token::{generate_secure_token, generate_session_id};

/// How often the cleanup sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// A validated session together with its owning user.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: User,
    pub session: Session,
}

/// Persistence adapter for session records.
#[derive(Clone)]
pub struct SessionStore {
    sessions: SessionRepository,
    users: UserRepository,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sessions: SessionRepository::new(pool.clone()),
            users: UserRepository::new(pool),
        }
    }

    /// Persist a new session for a fresh login.
    ///
    /// The id is supplied by the caller because the refresh token's
    /// claims must reference it before the row exists. The opaque
    /// session token and the CSRF token are generated here.
    pub async fn create_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        device_info: Option<String>,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        let now = Utc::now();
        let session = Session {
            id: session_id,
            user_id,
            session_token: generate_session_id(),
            refresh_token,
            csrf_token: generate_secure_token(),
            device_info,
            created_at: now,
            last_used_at: now,
            expires_at,
            is_active: true,
        };

        self.sessions.insert(&session).await?;
        Ok(session)
    }

    /// Validate a session by its opaque token.
    ///
    /// On a hit, stamps `last_used_at` and returns the user+session view.
    pub async fn validate_session(
        &self,
        session_token: &str,
    ) -> Result<Option<SessionContext>, RepositoryError> {
        let Some(session) = self.sessions.find_active_by_token(session_token).await? else {
            return Ok(None);
        };

        self.resolve(session).await
    }

    /// Validate a session by id (tokens carry the session id claim).
    pub async fn validate_session_by_id(
        &self,
        session_id: Uuid,
    ) -> Result<Option<SessionContext>, RepositoryError> {
        let Some(session) = self.sessions.find_active_by_id(session_id).await? else {
            return Ok(None);
        };

        self.resolve(session).await
    }

    async fn resolve(&self, session: Session) -> Result<Option<SessionContext>, RepositoryError> {
        let Some(user) = self.users.find_by_id(session.user_id).await? else {
            // Orphaned session; treat as a miss rather than an error.
            return Ok(None);
        };

        self.sessions.touch(session.id).await?;

        Ok(Some(SessionContext { user, session }))
    }

    /// Deactivate one session, scoped to its owner. Returns whether a row
    /// was affected.
    pub async fn revoke_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        let affected = self.sessions.deactivate_by_id(user_id, session_id).await?;
        Ok(affected > 0)
    }

    /// Deactivate the session behind a token; when `user_id` is given,
    /// cascade to all of that user's active sessions. Idempotent: a
    /// second call reports zero sessions invalidated.
    pub async fn logout(
        &self,
        session_token: &str,
        user_id: Option<Uuid>,
    ) -> Result<u64, RepositoryError> {
        let mut invalidated = self.sessions.deactivate_by_token(session_token).await?;

        if let Some(user_id) = user_id {
            invalidated += self.sessions.deactivate_all_for_user(user_id).await?;
        }

        Ok(invalidated)
    }

    /// Deactivate every active session a user owns.
    pub async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        self.sessions.deactivate_all_for_user(user_id).await
    }

    /// Delete expired or deactivated rows. Zero matches is normal.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, RepositoryError> {
        self.sessions.delete_expired().await
    }
}

/// Run the session cleanup loop until `cancel` is triggered.
///
/// Owned by the process lifecycle: the caller spawns it, keeps the
/// cancellation token, and decides the interval (injectable for tests).
/// A failed sweep logs and waits for the next tick; it never crashes the
/// process or blocks request handling.
pub async fn run_sweeper(store: SessionStore, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "session sweeper started");

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so a fresh start does not
    // race schema setup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("session sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                match store.cleanup_expired_sessions().await {
                    Ok(removed) => {
                        if removed > 0 {
                            tracing::info!(removed, "session sweep: purged stale sessions");
                        } else {
                            tracing::debug!("session sweep: nothing to purge");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "session sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;
    use crate::db;

    async fn setup() -> (SqlitePool, SessionStore, User) {
        let pool = db::connect_memory().await.unwrap();
        db::init_schema(&pool).await.unwrap();

        let user = User::new(
            "jdoe".to_string(),
            "jdoe@example.com".to_string(),
            "$argon2id$fake".to_string(),
            UserRole::Member,
            None,
        );
        UserRepository::new(pool.clone()).insert(&user).await.unwrap();

        (pool.clone(), SessionStore::new(pool), user)
    }

    #[tokio::test]
    async fn test_validate_hits_and_touches() {
        let (_pool, store, user) = setup().await;

        let session = store
            .create_session(
                Uuid::new_v4(),
                user.id,
                Some("agent".to_string()),
                "refresh".to_string(),
                Utc::now() + chrono::Duration::days(7),
            )
            .await
            .unwrap();

        assert_eq!(session.session_token.len(), 32);
        assert_eq!(session.csrf_token.len(), 64);

        let ctx = store
            .validate_session(&session.session_token)
            .await
            .unwrap()
            .expect("session should validate");
        assert_eq!(ctx.user.id, user.id);
        assert_eq!(ctx.session.id, session.id);

        let by_id = store.validate_session_by_id(session.id).await.unwrap();
        assert!(by_id.is_some());
    }

    #[tokio::test]
    async fn test_validate_miss_is_none_not_error() {
        let (_pool, store, _user) = setup().await;
        let miss = store.validate_session("does-not-exist").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_does_not_validate() {
        let (_pool, store, user) = setup().await;

        let session = store
            .create_session(
                Uuid::new_v4(),
                user.id,
                None,
                "refresh".to_string(),
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let miss = store.validate_session(&session.session_token).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (_pool, store, user) = setup().await;

        let session = store
            .create_session(
                Uuid::new_v4(),
                user.id,
                None,
                "refresh".to_string(),
                Utc::now() + chrono::Duration::days(7),
            )
            .await
            .unwrap();

        let first = store.logout(&session.session_token, None).await.unwrap();
        assert_eq!(first, 1);

        let second = store.logout(&session.session_token, None).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_logout_cascades_with_user_id() {
        let (_pool, store, user) = setup().await;

        let expires = Utc::now() + chrono::Duration::days(7);
        let first = store
            .create_session(Uuid::new_v4(), user.id, None, "r1".to_string(), expires)
            .await
            .unwrap();
        store
            .create_session(Uuid::new_v4(), user.id, None, "r2".to_string(), expires)
            .await
            .unwrap();

        let invalidated = store
            .logout(&first.session_token, Some(user.id))
            .await
            .unwrap();
        assert_eq!(invalidated, 2);
    }

    #[tokio::test]
    async fn test_cross_user_revocation_is_refused() {
        let (_pool, store, user) = setup().await;

        let session = store
            .create_session(
                Uuid::new_v4(),
                user.id,
                None,
                "refresh".to_string(),
                Utc::now() + chrono::Duration::days(7),
            )
            .await
            .unwrap();

        assert!(!store.revoke_session(Uuid::new_v4(), session.id).await.unwrap());
        assert!(store.revoke_session(user.id, session.id).await.unwrap());
        assert!(!store.revoke_session(user.id, session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_and_inactive() {
        let (_pool, store, user) = setup().await;

        let live = Utc::now() + chrono::Duration::days(7);
        let stale = Utc::now() - chrono::Duration::hours(1);

        store
            .create_session(Uuid::new_v4(), user.id, None, "r1".to_string(), live)
            .await
            .unwrap();
        store
            .create_session(Uuid::new_v4(), user.id, None, "r2".to_string(), stale)
            .await
            .unwrap();
        let revoked = store
            .create_session(Uuid::new_v4(), user.id, None, "r3".to_string(), live)
            .await
            .unwrap();
        store.revoke_session(user.id, revoked.id).await.unwrap();

        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 2);
        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_purges_and_stops() {
        let (_pool, store, user) = setup().await;

        store
            .create_session(
                Uuid::new_v4(),
                user.id,
                None,
                "stale".to_string(),
                Utc::now() - chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            store.clone(),
            Duration::from_millis(20),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.cleanup_expired_sessions().await.unwrap(), 0);
    }
}
