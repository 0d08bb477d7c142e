//! Security audit logging
//!
//! Two independent append-only sinks: the activity log (routine actions
//! with a success flag) and security events (typed, with a severity).
//! Both are best-effort from the caller's perspective: a failed write is
//! reported through `tracing` and never propagated, so audit logging can
//! never fail the operation it records.
//!
//! Events are additionally logged at INFO level under the "audit" target,
//! making them easy to filter and route to security monitoring systems.

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

/// Security event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request metadata attached to audit rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_path: Option<String>,
}

impl RequestContext {
    /// Build a context from request headers and path.
    pub fn from_headers(headers: &HeaderMap, path: &str) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
            request_path: Some(path.to_string()),
        }
    }
}

/// One activity-log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(flatten)]
    pub context: RequestContext,
}

impl ActivityEntry {
    pub fn new(action: impl Into<String>, user_id: Option<Uuid>, success: bool) -> Self {
        Self {
            user_id,
            action: action.into(),
            success,
            error_message: None,
            metadata: None,
            context: RequestContext::default(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// One security-event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    #[serde(flatten)]
    pub context: RequestContext,
}

impl SecurityEvent {
    pub fn new(
        event_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: None,
            event_type: event_type.into(),
            severity,
            description: description.into(),
            context: RequestContext::default(),
        }
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Append-only writer for both audit sinks.
#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
}

impl AuditLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a routine action. Write failures are warned, not raised.
    pub async fn activity(&self, entry: ActivityEntry) {
        info!(
            target: "audit",
            action = %entry.action,
            user_id = ?entry.user_id,
            success = entry.success,
            path = ?entry.context.request_path,
            ip_address = ?entry.context.ip_address,
            "activity"
        );

        let metadata = entry
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());

        let result = sqlx::query(
            r#"
            INSERT INTO activity_log
                (user_id, action, success, error_message, metadata,
                 ip_address, user_agent, request_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(metadata)
        .bind(&entry.context.ip_address)
        .bind(&entry.context.user_agent)
        .bind(&entry.context.request_path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(target: "audit", error = %e, action = %entry.action, "activity log write failed");
        }
    }

    /// Record a security event. Write failures are warned, not raised.
    pub async fn security(&self, event: SecurityEvent) {
        info!(
            target: "audit",
            event_type = %event.event_type,
            severity = %event.severity,
            user_id = ?event.user_id,
            description = %event.description,
            ip_address = ?event.context.ip_address,
            "security event"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO security_events
                (user_id, event_type, severity, description,
                 ip_address, user_agent, request_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(event.user_id)
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(&event.description)
        .bind(&event.context.ip_address)
        .bind(&event.context.user_agent)
        .bind(&event.context.request_path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(target: "audit", error = %e, event_type = %event.event_type, "security event write failed");
        }
    }
}

/// Extract the client IP from request headers.
///
/// Checks X-Forwarded-For (first hop), then X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Extract the user agent from request headers.
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_severity_serialization() {
        assert_eq!(Severity::High.as_str(), "high");
        let json = serde_json::to_string(&Severity::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = HeaderMap::new();
        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }

    #[tokio::test]
    async fn test_sinks_are_append_only_and_best_effort() {
        let pool = db::connect_memory().await.unwrap();
        db::init_schema(&pool).await.unwrap();
        let audit = AuditLogger::new(pool.clone());

        audit
            .activity(
                ActivityEntry::new("login", Some(Uuid::new_v4()), true)
                    .with_metadata(serde_json::json!({"device": "test"})),
            )
            .await;
        audit
            .security(SecurityEvent::new(
                "failed_login",
                Severity::Medium,
                "invalid password for test",
            ))
            .await;

        let activities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_log")
            .fetch_one(&pool)
            .await
            .unwrap();
        let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM security_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(activities, 1);
        assert_eq!(events, 1);
    }

    #[tokio::test]
    async fn test_write_failure_does_not_propagate() {
        // No schema applied, so the insert fails; the call must still
        // return without panicking or erroring.
        let pool = db::connect_memory().await.unwrap();
        let audit = AuditLogger::new(pool);

        audit.activity(ActivityEntry::new("login", None, false)).await;
        audit
            .security(SecurityEvent::new("failed_login", Severity::Low, "x"))
            .await;
    }
}
