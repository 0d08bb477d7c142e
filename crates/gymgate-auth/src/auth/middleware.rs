//! Authentication and authorization middleware
//!
//! `authenticate` resolves the caller from a bearer token (header first,
//! cookie fallback), validates the referenced session, and attaches
//! [`CurrentUser`] to request extensions. `require_permissions` gates a
//! route on the caller's role-derived permission set.
//!
//! API requests (path under the configured prefix) get JSON error bodies;
//! browser requests are redirected to `/login?redirect=...` or
//! `/unauthorized` instead.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::audit::{ActivityEntry, RequestContext, SecurityEvent, Severity};
use crate::auth::models::{Session, User, UserStatus};
use crate::error::AuthError;
use crate::state::AuthState;

/// Resolved caller, attached to request extensions by [`authenticate`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
    pub permissions: Vec<String>,
}

impl CurrentUser {
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p == name)
    }

    pub fn has_any(&self, required: &[&str]) -> bool {
        required.iter().any(|name| self.has_permission(name))
    }

    pub fn has_all(&self, required: &[&str]) -> bool {
        required.iter().all(|name| self.has_permission(name))
    }
}

/// How a required permission set is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// At least one required permission suffices (default).
    Any,
    /// Every required permission must be present.
    All,
}

/// Require a valid access token and a live session.
///
/// Token extraction prefers the `Authorization: Bearer` header over the
/// configured cookie. A non-active account is treated as unauthenticated,
/// not as a distinct error. Each authenticated access lands in the
/// activity log.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let original_uri = request.uri().to_string();
    let ctx = RequestContext::from_headers(request.headers(), &path);

    let Some(token) = extract_token(&request, &state.config.cookie_name) else {
        return unauthenticated(&state, &path, &original_uri);
    };

    let claims = match state.service.codec().verify_access_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            state
                .audit
                .security(
                    SecurityEvent::new(
                        "invalid_token",
                        Severity::Medium,
                        format!("Access token rejected: {e}"),
                    )
                    .with_context(ctx),
                )
                .await;
            return unauthenticated(&state, &path, &original_uri);
        }
    };

    let Ok(session_id) = claims.session_uuid() else {
        return unauthenticated(&state, &path, &original_uri);
    };

    let session_ctx = match state.service.sessions().validate_session_by_id(session_id).await {
        Ok(Some(session_ctx)) => session_ctx,
        Ok(None) => return unauthenticated(&state, &path, &original_uri),
        Err(e) => return AuthError::from(e).into_response(),
    };

    if session_ctx.user.status != UserStatus::Active {
        state
            .audit
            .security(
                SecurityEvent::new(
                    "invalid_token",
                    Severity::Medium,
                    "User account is not active",
                )
                .for_user(session_ctx.user.id)
                .with_context(ctx.clone()),
            )
            .await;
        return unauthenticated(&state, &path, &original_uri);
    }

    let permissions = match state.service.permissions_for_role(session_ctx.user.role).await {
        Ok(permissions) => permissions,
        Err(e) => return e.into_response(),
    };

    state
        .audit
        .activity(
            ActivityEntry::new("access", Some(session_ctx.user.id), true)
                .with_metadata(serde_json::json!({ "method": request.method().as_str() }))
                .with_context(ctx),
        )
        .await;

    request.extensions_mut().insert(CurrentUser {
        user: session_ctx.user,
        session: session_ctx.session,
        permissions,
    });

    next.run(request).await
}

type GateFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>;

/// Middleware factory gating a route on permissions.
///
/// Layer it inside (after) [`authenticate`] so [`CurrentUser`] is present:
///
/// ```ignore
/// Router::new()
///     .route("/api/reports", get(reports_handler))
///     .route_layer(middleware::from_fn_with_state(
///         state.clone(),
///         require_permissions(&["reports.view"], PermissionMode::Any),
///     ))
///     .route_layer(middleware::from_fn_with_state(state, authenticate));
/// ```
pub fn require_permissions(
    required: &'static [&'static str],
    mode: PermissionMode,
) -> impl Fn(State<AuthState>, Request<Body>, Next) -> GateFuture + Clone {
    move |State(state): State<AuthState>, request: Request<Body>, next: Next| {
        Box::pin(async move {
            let path = request.uri().path().to_string();
            let original_uri = request.uri().to_string();
            let ctx = RequestContext::from_headers(request.headers(), &path);

            let Some(current) = request.extensions().get::<CurrentUser>().cloned() else {
                return unauthenticated(&state, &path, &original_uri);
            };

            let allowed = match mode {
                PermissionMode::Any => current.has_any(required),
                PermissionMode::All => current.has_all(required),
            };

            if !allowed {
                state
                    .audit
                    .security(
                        SecurityEvent::new(
                            "unauthorized_access",
                            Severity::High,
                            format!(
                                "Role {} denied; required {:?} ({:?} mode), held {:?}",
                                current.user.role, required, mode, current.permissions
                            ),
                        )
                        .for_user(current.user.id)
                        .with_context(ctx),
                    )
                    .await;

                return forbidden(&state, &path, required, &current.permissions);
            }

            next.run(request).await
        })
    }
}

/// Pull the bearer token from the Authorization header, falling back to
/// the named cookie.
fn extract_token(request: &Request<Body>, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = request.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    let cookies = request.headers().get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name).then(|| value.to_string())
    })
}

fn is_api_request(state: &AuthState, path: &str) -> bool {
    path.starts_with(&state.config.api_prefix)
}

fn unauthenticated(state: &AuthState, path: &str, original_uri: &str) -> Response {
    if is_api_request(state, path) {
        return AuthError::authentication("Authentication required").into_response();
    }

    Redirect::to(&format!("/login?redirect={}", percent_encode(original_uri))).into_response()
}

fn forbidden(
    state: &AuthState,
    path: &str,
    required: &[&str],
    user_permissions: &[String],
) -> Response {
    if is_api_request(state, path) {
        return AuthError::Authorization {
            message: "Missing required permissions".to_string(),
            required: required.iter().map(|s| s.to_string()).collect(),
            user_permissions: user_permissions.to_vec(),
        }
        .into_response();
    }

    Redirect::to("/unauthorized").into_response()
}

/// Percent-encode a redirect target for use as a query value.
fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{byte:02X}"));
            }
        }
    }
    encoded
}

/// Exempt safe methods from state-changing protections.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}
