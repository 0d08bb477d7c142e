//! Request-pipeline companion middleware
//!
//! Authentication and permission gating live in `auth::middleware`; this
//! module carries the cross-cutting protections layered around them.

pub mod csrf;
pub mod rate_limit;

pub use csrf::{csrf_protection, CSRF_HEADER};
pub use rate_limit::{rate_limit, RateLimitConfig, RateLimiter};
