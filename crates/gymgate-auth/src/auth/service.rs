//! Authentication service layer
//!
//! Orchestrates login, token refresh, logout, password changes, and
//! account lifecycle over the repositories, the token codec, and the
//! session store.
//!
//! Login failures surface one generic message regardless of cause, so a
//! caller cannot distinguish "user doesn't exist" from "wrong password";
//! the specific reason lands in the security-event sink instead. The
//! deliberate exception is the lockout, which is disclosed to aid
//! legitimate users.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::audit::{ActivityEntry, AuditLogger, RequestContext, SecurityEvent, Severity};
use crate::auth::models::{
    CreateUserRequest, LoginRequest, LoginResponse, LogoutResponse, RefreshResponse, User,
    UserPublic, UserRole, UserStatus,
};
use crate::auth::password::{hash_password, validate_password_strength, verify_password};
use crate::auth::repository::{PermissionRepository, UserRepository};
use crate::auth::session::SessionStore;
use crate::auth::token::TokenCodec;
use crate::config::AuthConfig;
use crate::error::{AuthError, ACCOUNT_LOCKED, INVALID_CREDENTIALS, REFRESH_FAILED};

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    permissions: PermissionRepository,
    sessions: SessionStore,
    codec: TokenCodec,
    audit: AuditLogger,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            permissions: PermissionRepository::new(pool.clone()),
            sessions: SessionStore::new(pool.clone()),
            codec: TokenCodec::new(&config),
            audit: AuditLogger::new(pool),
            config,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Resolve the permission names granted to a role.
    pub async fn permissions_for_role(&self, role: UserRole) -> Result<Vec<String>, AuthError> {
        Ok(self.permissions.find_names_by_role(role.as_str()).await?)
    }

    /// Log in with username or email.
    ///
    /// Lookup, lockout check, password verification, then session
    /// creation and token issuance. Five consecutive failures lock the
    /// account for the configured duration; a lapsed lock clears on the
    /// next successful login.
    ///
    /// # Arguments
    ///
    /// * `request` - Identifier (exact username or case-insensitive
    ///   email), password, and optional device description
    /// * `ctx` - Request metadata attached to audit rows
    ///
    /// # Returns
    ///
    /// * `Ok(LoginResponse)` - Access, refresh, CSRF, and session tokens
    ///   plus the public user view
    /// * `Err(AuthError)` - Always the generic credential message; the
    ///   lockout is the one disclosed failure cause
    pub async fn login(
        &self,
        request: LoginRequest,
        ctx: RequestContext,
    ) -> Result<LoginResponse, AuthError> {
        let identifier = request.username_or_email.trim();

        let user = self.users.find_by_username_or_email(identifier).await?;

        let Some(user) = user else {
            self.audit
                .security(
                    SecurityEvent::new(
                        "failed_login",
                        Severity::Medium,
                        format!("Login attempt for unknown identifier {identifier}"),
                    )
                    .with_context(ctx),
                )
                .await;
            return Err(AuthError::authentication(INVALID_CREDENTIALS));
        };

        // Inactive (soft-deleted) accounts fail exactly like unknown ones.
        if user.status != UserStatus::Active {
            self.audit
                .security(
                    SecurityEvent::new(
                        "failed_login",
                        Severity::Medium,
                        format!("Login attempt for non-active account {}", user.username),
                    )
                    .for_user(user.id)
                    .with_context(ctx),
                )
                .await;
            return Err(AuthError::authentication(INVALID_CREDENTIALS));
        }

        if user.is_locked() {
            self.audit
                .security(
                    SecurityEvent::new(
                        "login_blocked_locked",
                        Severity::High,
                        format!("Login blocked for locked account {}", user.username),
                    )
                    .for_user(user.id)
                    .with_context(ctx),
                )
                .await;
            return Err(AuthError::authentication(ACCOUNT_LOCKED));
        }

        let password_valid = verify_password(&request.password, &user.password_hash)
            .map_err(|e| AuthError::Internal(format!("Failed to verify password: {e}")))?;

        if !password_valid {
            return Err(self.handle_failed_password(&user, ctx).await);
        }

        self.users.record_login_success(user.id).await?;

        let session_id = Uuid::new_v4();
        let refresh = self
            .codec
            .create_refresh_token(&user, session_id)
            .map_err(|e| AuthError::Internal(format!("Failed to sign refresh token: {e}")))?;
        let session = self
            .sessions
            .create_session(
                session_id,
                user.id,
                request.device_info.clone(),
                refresh.token.clone(),
                refresh.expires_at,
            )
            .await?;
        let access = self
            .codec
            .create_access_token(&user, session_id)
            .map_err(|e| AuthError::Internal(format!("Failed to sign access token: {e}")))?;

        self.audit
            .activity(
                ActivityEntry::new("login", Some(user.id), true)
                    .with_metadata(serde_json::json!({ "session_id": session_id }))
                    .with_context(ctx),
            )
            .await;

        let mut public = user.to_public();
        public.last_login_at = Some(Utc::now());

        Ok(LoginResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            csrf_token: session.csrf_token.clone(),
            session_token: session.session_token.clone(),
            token_type: "Bearer".to_string(),
            expires_at: access.expires_at,
            user: public,
        })
    }

    /// Bump the failure counter and lock the account at the threshold.
    async fn handle_failed_password(&self, user: &User, ctx: RequestContext) -> AuthError {
        let attempts = match self.users.increment_failed_attempts(user.id).await {
            Ok(attempts) => attempts,
            Err(e) => return AuthError::from(e),
        };

        if attempts >= self.config.max_failed_attempts {
            let locked_until = Utc::now() + Duration::minutes(self.config.lockout_duration_mins);
            if let Err(e) = self.users.lock_account(user.id, locked_until).await {
                return AuthError::from(e);
            }
            self.audit
                .security(
                    SecurityEvent::new(
                        "account_locked",
                        Severity::High,
                        format!(
                            "Account {} locked until {} after {} failed attempts",
                            user.username, locked_until, attempts
                        ),
                    )
                    .for_user(user.id)
                    .with_context(ctx),
                )
                .await;
        } else {
            self.audit
                .security(
                    SecurityEvent::new(
                        "failed_login",
                        Severity::Medium,
                        format!(
                            "Invalid password for {} (attempt {} of {})",
                            user.username, attempts, self.config.max_failed_attempts
                        ),
                    )
                    .for_user(user.id)
                    .with_context(ctx),
                )
                .await;
        }

        AuthError::authentication(INVALID_CREDENTIALS)
    }

    /// Exchange a refresh token for a new access token bound to the same
    /// session. Every failure mode reports the same generic message.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        ctx: RequestContext,
    ) -> Result<RefreshResponse, AuthError> {
        match self.refresh_token_inner(refresh_token).await {
            Ok(response) => {
                self.audit
                    .activity(ActivityEntry::new("token_refresh", None, true).with_context(ctx))
                    .await;
                Ok(response)
            }
            Err(reason) => {
                self.audit
                    .security(
                        SecurityEvent::new("token_refresh_failed", Severity::Medium, reason)
                            .with_context(ctx),
                    )
                    .await;
                Err(AuthError::authentication(REFRESH_FAILED))
            }
        }
    }

    /// Returns the specific failure reason for the security log; the
    /// caller collapses it into the generic message.
    async fn refresh_token_inner(&self, refresh_token: &str) -> Result<RefreshResponse, String> {
        let claims = self
            .codec
            .verify_refresh_token(refresh_token)
            .map_err(|e| format!("Refresh token rejected: {e}"))?;

        let session_id = claims
            .session_uuid()
            .map_err(|_| "Refresh token carries a malformed session id".to_string())?;

        let ctx = self
            .sessions
            .validate_session_by_id(session_id)
            .await
            .map_err(|e| format!("Session lookup failed: {e}"))?
            .ok_or_else(|| format!("No live session {session_id} for refresh token"))?;

        // The presented token must be the one the session was born with.
        if ctx.session.refresh_token != refresh_token {
            return Err(format!("Refresh token does not match session {session_id}"));
        }

        if ctx.user.status != UserStatus::Active {
            return Err(format!("Account {} is not active", ctx.user.username));
        }

        let access = self
            .codec
            .create_access_token(&ctx.user, session_id)
            .map_err(|e| format!("Failed to sign access token: {e}"))?;

        Ok(RefreshResponse {
            access_token: access.token,
            expires_at: access.expires_at,
        })
    }

    /// Deactivate the session behind a token, optionally cascading to all
    /// of the user's sessions. Idempotent.
    pub async fn logout(
        &self,
        session_token: &str,
        user_id: Option<Uuid>,
        ctx: RequestContext,
    ) -> Result<LogoutResponse, AuthError> {
        let result = self.sessions.logout(session_token, user_id).await;

        match &result {
            Ok(invalidated) => {
                self.audit
                    .activity(
                        ActivityEntry::new("logout", user_id, true)
                            .with_metadata(serde_json::json!({ "sessions_invalidated": invalidated }))
                            .with_context(ctx),
                    )
                    .await;
            }
            Err(e) => {
                self.audit
                    .activity(
                        ActivityEntry::new("logout", user_id, false)
                            .with_error(e.to_string())
                            .with_context(ctx),
                    )
                    .await;
            }
        }

        let sessions_invalidated = result?;
        Ok(LogoutResponse {
            sessions_invalidated,
        })
    }

    /// Change a user's password after verifying the current one.
    ///
    /// On success every existing session for the user is invalidated,
    /// forcing re-login everywhere.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        ctx: RequestContext,
    ) -> Result<(), AuthError> {
        let result = self
            .change_password_inner(user_id, current_password, new_password)
            .await;

        match &result {
            Ok(invalidated) => {
                self.audit
                    .activity(
                        ActivityEntry::new("password_changed", Some(user_id), true)
                            .with_metadata(serde_json::json!({ "sessions_invalidated": invalidated }))
                            .with_context(ctx.clone()),
                    )
                    .await;
                self.audit
                    .security(
                        SecurityEvent::new(
                            "password_changed",
                            Severity::Info,
                            "Password changed; all sessions invalidated",
                        )
                        .for_user(user_id)
                        .with_context(ctx),
                    )
                    .await;
            }
            Err(e) => {
                self.audit
                    .activity(
                        ActivityEntry::new("password_changed", Some(user_id), false)
                            .with_error(e.to_string())
                            .with_context(ctx),
                    )
                    .await;
            }
        }

        result.map(|_| ())
    }

    async fn change_password_inner(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<u64, AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;

        let current_valid = verify_password(current_password, &user.password_hash)
            .map_err(|e| AuthError::Internal(format!("Failed to verify password: {e}")))?;
        if !current_valid {
            return Err(AuthError::authentication("Current password is incorrect"));
        }

        self.apply_new_password(user_id, new_password).await
    }

    /// Admin-initiated password reset: no current-password check, same
    /// strength gate and bulk session invalidation.
    pub async fn reset_user_password(
        &self,
        admin_id: Uuid,
        target_user_id: Uuid,
        new_password: &str,
        ctx: RequestContext,
    ) -> Result<(), AuthError> {
        let result = self
            .reset_user_password_inner(target_user_id, new_password)
            .await;

        match &result {
            Ok(invalidated) => {
                self.audit
                    .security(
                        SecurityEvent::new(
                            "password_reset",
                            Severity::High,
                            format!("Password reset by administrator {admin_id}"),
                        )
                        .for_user(target_user_id)
                        .with_context(ctx.clone()),
                    )
                    .await;
                self.audit
                    .activity(
                        ActivityEntry::new("password_reset", Some(admin_id), true)
                            .with_metadata(serde_json::json!({
                                "target_user_id": target_user_id,
                                "sessions_invalidated": invalidated,
                            }))
                            .with_context(ctx),
                    )
                    .await;
            }
            Err(e) => {
                self.audit
                    .activity(
                        ActivityEntry::new("password_reset", Some(admin_id), false)
                            .with_error(e.to_string())
                            .with_context(ctx),
                    )
                    .await;
            }
        }

        result.map(|_| ())
    }

    async fn reset_user_password_inner(
        &self,
        target_user_id: Uuid,
        new_password: &str,
    ) -> Result<u64, AuthError> {
        self.users
            .find_by_id(target_user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;

        self.apply_new_password(target_user_id, new_password).await
    }

    async fn apply_new_password(
        &self,
        user_id: Uuid,
        new_password: &str,
    ) -> Result<u64, AuthError> {
        let strength = validate_password_strength(new_password);
        if !strength.is_valid {
            return Err(AuthError::validation(strength.errors.join("; ")));
        }

        let password_hash = hash_password(new_password)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {e}")))?;

        self.users.update_password(user_id, &password_hash).await?;
        let invalidated = self.sessions.invalidate_all_for_user(user_id).await?;

        Ok(invalidated)
    }

    /// Create a user account.
    ///
    /// Duplicates are rejected before hashing to avoid the wasted work;
    /// the store's unique constraints backstop concurrent inserts.
    pub async fn create_user(
        &self,
        request: CreateUserRequest,
        actor_id: Option<Uuid>,
        ctx: RequestContext,
    ) -> Result<UserPublic, AuthError> {
        let result = self.create_user_inner(request).await;

        match &result {
            Ok(user) => {
                self.audit
                    .activity(
                        ActivityEntry::new("user_created", actor_id, true)
                            .with_metadata(serde_json::json!({
                                "user_id": user.id,
                                "role": user.role,
                            }))
                            .with_context(ctx),
                    )
                    .await;
            }
            Err(e) => {
                self.audit
                    .activity(
                        ActivityEntry::new("user_created", actor_id, false)
                            .with_error(e.to_string())
                            .with_context(ctx),
                    )
                    .await;
            }
        }

        result
    }

    async fn create_user_inner(&self, request: CreateUserRequest) -> Result<UserPublic, AuthError> {
        if request.username.trim().is_empty() || request.email.trim().is_empty() {
            return Err(AuthError::validation("Username and email are required"));
        }
        if !request.email.contains('@') {
            return Err(AuthError::validation("Invalid email format"));
        }

        if self
            .users
            .exists_with_username_or_email(&request.username, &request.email)
            .await?
        {
            return Err(AuthError::validation("Username or email already exists"));
        }

        let strength = validate_password_strength(&request.password);
        if !strength.is_valid {
            return Err(AuthError::validation(strength.errors.join("; ")));
        }

        let password_hash = hash_password(&request.password)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {e}")))?;

        let user = User::new(
            request.username,
            request.email,
            password_hash,
            request.role,
            request.member_id,
        );
        self.users.insert(&user).await?;

        Ok(user.to_public())
    }

    /// Soft-delete a user: status set to inactive, sessions invalidated.
    /// Self-deletion is refused.
    pub async fn delete_user(
        &self,
        actor_id: Uuid,
        target_user_id: Uuid,
        ctx: RequestContext,
    ) -> Result<(), AuthError> {
        let result = self.delete_user_inner(actor_id, target_user_id).await;

        match &result {
            Ok(()) => {
                self.audit
                    .security(
                        SecurityEvent::new(
                            "user_deactivated",
                            Severity::Medium,
                            format!("Account deactivated by {actor_id}"),
                        )
                        .for_user(target_user_id)
                        .with_context(ctx.clone()),
                    )
                    .await;
                self.audit
                    .activity(
                        ActivityEntry::new("user_deleted", Some(actor_id), true)
                            .with_metadata(serde_json::json!({ "target_user_id": target_user_id }))
                            .with_context(ctx),
                    )
                    .await;
            }
            Err(e) => {
                self.audit
                    .activity(
                        ActivityEntry::new("user_deleted", Some(actor_id), false)
                            .with_error(e.to_string())
                            .with_context(ctx),
                    )
                    .await;
            }
        }

        result
    }

    async fn delete_user_inner(
        &self,
        actor_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<(), AuthError> {
        if actor_id == target_user_id {
            return Err(AuthError::validation("Cannot delete your own account"));
        }

        self.users
            .find_by_id(target_user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))?;

        self.users
            .set_status(target_user_id, UserStatus::Inactive)
            .await?;
        self.sessions.invalidate_all_for_user(target_user_id).await?;

        Ok(())
    }
}
