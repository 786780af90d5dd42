//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)
//!
//! Role checks happen in middleware before a handler runs.

/// Admin back office
pub mod admin;
/// Registration, login, sessions
pub mod auth;
/// Client beneficiaries
pub mod beneficiaries;
/// Client dashboard
pub mod dashboard;
pub mod health;
/// In-app notifications
pub mod notifications;
/// Exchange rate and quotes
pub mod rates;
/// Client subscriptions
pub mod subscriptions;
/// Madagascar payout team
pub mod team;
/// Client transfers
pub mod transfers;
/// Payment processor events
pub mod webhooks;
