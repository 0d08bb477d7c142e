//! Rate limiting middleware
//!
//! Fixed-window in-memory rate limiting keyed by (client IP, method,
//! path). Exceeding the window's max emits a `rate_limit_exceeded`
//! security event and responds 429 with a `Retry-After` header.
//!
//! Stale counter keys are swept opportunistically from `check`, so the
//! window map stays bounded without a dedicated background task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::audit::{extract_ip_address, AuditLogger, RequestContext, SecurityEvent, Severity};

/// Rate limit tunables.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per key per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Strict limits for credential endpoints (login, refresh).
    pub fn strict() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// One (ip, method, path) counter key.
type RateLimitKey = (String, String, String);

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

struct LimiterState {
    entries: HashMap<RateLimitKey, WindowEntry>,
    last_sweep: Instant,
}

enum RateLimitDecision {
    Allowed,
    Exceeded { retry_after: Duration },
}

/// Fixed-window counter shared across requests.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    audit: AuditLogger,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, audit: AuditLogger) -> Self {
        Self {
            config,
            audit,
            state: Arc::new(Mutex::new(LimiterState {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    fn check(&self, key: RateLimitKey) -> RateLimitDecision {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let window = self.config.window;

        // Opportunistic sweep: drop keys whose window lapsed more than
        // one full window ago, at most once per two windows.
        if now.duration_since(state.last_sweep) >= window * 2 {
            state
                .entries
                .retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
            state.last_sweep = now;
        }

        let entry = state.entries.entry(key).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        if entry.count > self.config.max_requests {
            let reset_at = entry.window_start + window;
            RateLimitDecision::Exceeded {
                retry_after: reset_at.saturating_duration_since(now),
            }
        } else {
            RateLimitDecision::Allowed
        }
    }
}

/// Rate limiting middleware function.
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_ip_address(request.headers()).unwrap_or_else(|| "unknown".to_string());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    match limiter.check((ip.clone(), method.clone(), path.clone())) {
        RateLimitDecision::Allowed => next.run(request).await,
        RateLimitDecision::Exceeded { retry_after } => {
            warn!(
                ip = %ip,
                method = %method,
                path = %path,
                retry_after_secs = retry_after.as_secs(),
                "rate limit exceeded"
            );

            limiter
                .audit
                .security(
                    SecurityEvent::new(
                        "rate_limit_exceeded",
                        Severity::Medium,
                        format!("Rate limit exceeded for {method} {path}"),
                    )
                    .with_context(RequestContext::from_headers(request.headers(), &path)),
                )
                .await;

            let body = serde_json::json!({
                "error": "RATE_LIMIT_EXCEEDED",
                "message": "Too many requests",
                "retry_after_seconds": retry_after.as_secs(),
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}
