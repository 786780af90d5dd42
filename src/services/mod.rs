//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, state transitions and
//! calls to the payment processor.

pub mod auth_service;
pub mod beneficiary_service;
pub mod notification_service;
pub mod payments;
pub mod report_service;
pub mod scheduler;
pub mod settings_service;
pub mod subscription_service;
pub mod transfer_service;
pub mod user_service;
pub mod webhook_service;
