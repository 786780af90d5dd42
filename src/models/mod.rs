//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response bodies built around them.

/// Recipients registered by clients
pub mod beneficiary;
/// In-app notifications
pub mod notification;
/// Page/limit query parameters
pub mod pagination;
/// Dashboards and reports
pub mod report;
/// Login sessions
pub mod session;
/// Settings, exchange rates and pricing
pub mod settings;
/// Recurring transfer schedules
pub mod subscription;
/// Transfers and their lifecycle
pub mod transfer;
/// Accounts, roles and auth payloads
pub mod user;
