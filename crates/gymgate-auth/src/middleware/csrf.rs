//! CSRF protection middleware
//!
//! State-changing requests from an authenticated browser session must
//! carry the session's CSRF token in the `x-csrf-token` header. The token
//! is issued at login and stored on the session row, so a forged request
//! cannot supply a merely well-formed token.
//!
//! Safe methods (GET/HEAD/OPTIONS) are exempt, as are unauthenticated
//! requests: endpoints reachable without a session (login itself) have no
//! stored token to compare against.

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::audit::{RequestContext, SecurityEvent, Severity};
use crate::auth::middleware::{is_safe_method, CurrentUser};
use crate::error::ErrorBody;
use crate::state::AuthState;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Validate the CSRF header against the authenticated session's token.
///
/// Layer it inside (after) `authenticate` so the session is resolved.
pub async fn csrf_protection(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_safe_method(request.method()) {
        return next.run(request).await;
    }

    let Some(current) = request.extensions().get::<CurrentUser>().cloned() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok());

    let valid = presented == Some(current.session.csrf_token.as_str());
    if !valid {
        let path = request.uri().path().to_string();
        state
            .audit
            .security(
                SecurityEvent::new(
                    "csrf_validation_failed",
                    Severity::High,
                    if presented.is_none() {
                        format!("Missing CSRF token on {} {}", request.method(), path)
                    } else {
                        format!("CSRF token mismatch on {} {}", request.method(), path)
                    },
                )
                .for_user(current.user.id)
                .with_context(RequestContext::from_headers(request.headers(), &path)),
            )
            .await;

        return (
            StatusCode::FORBIDDEN,
            Json(ErrorBody::new("FORBIDDEN", "CSRF token missing or invalid")),
        )
            .into_response();
    }

    next.run(request).await
}
