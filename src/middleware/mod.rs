//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Authenticate requests and gate them by role
//! - Throttle abusive clients
//! - Short-circuit requests (reject unauthorized)

/// Session authentication and role gates
pub mod auth;
/// Token-bucket throttling for the auth routes
pub mod rate_limit;
