//! Dashboard and report payloads.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{
    notification::Notification,
    transfer::{Transfer, TransferDetails},
};
use crate::validation::{ValidationError, ValidationResult};

/// Longest range accepted by the daily report.
pub const MAX_REPORT_DAYS: u64 = 366;

/// `GET /api/v1/dashboard`
#[derive(Debug, Serialize)]
pub struct ClientDashboard {
    pub beneficiary_count: i64,
    pub active_subscription_count: i64,
    /// Sum of COMPLETED transfers, CAD cents
    pub total_sent_cad_cents: i64,
    pub pending_transfer_count: i64,
    pub unread_notifications: i64,
    pub recent_transfers: Vec<Transfer>,
    pub recent_notifications: Vec<Notification>,
}

/// `GET /api/v1/team/dashboard`
#[derive(Debug, Serialize)]
pub struct TeamDashboard {
    pub pending_count: i64,
    pub pending_amount_mga: i64,
    pub completed_today: i64,
    pub failed_today: i64,
    /// Payout queue head, oldest first
    pub oldest_pending: Vec<TransferDetails>,
}

#[derive(Debug, Default, Serialize, sqlx::FromRow)]
pub struct StatusCounts {
    pub active: i64,
    pub inactive: i64,
    pub suspended: i64,
}

#[derive(Debug, Default, Serialize, sqlx::FromRow)]
pub struct TransferCounts {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

/// `GET /api/v1/admin/stats`
#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub users: StatusCounts,
    pub clients: i64,
    pub transfers: TransferCounts,
    pub completed_volume_cad_cents: i64,
    pub completed_volume_mga: i64,
    pub fees_collected_cad_cents: i64,
    pub active_subscriptions: i64,
}

/// One row of the daily report.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyReportRow {
    pub day: NaiveDate,
    pub transfer_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub volume_cad_cents: i64,
    pub fees_cad_cents: i64,
    pub volume_mga: i64,
}

/// `?from=2026-10-01&to=2026-10-17`, both inclusive. Defaults to the last 30 days.
#[derive(Debug, Default, Deserialize)]
pub struct ReportRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ReportRange {
    /// Concrete `(from, to)` relative to `today`.
    pub fn resolve(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ValidationError> {
        let to = self.to.unwrap_or(today);
        let from = self
            .from
            .unwrap_or_else(|| to.checked_sub_days(Days::new(29)).unwrap_or(to));

        if from > to {
            return Err(ValidationError::new("from", "`from` must not be after `to`"));
        }
        check_span(from, to)?;
        Ok((from, to))
    }
}

fn check_span(from: NaiveDate, to: NaiveDate) -> ValidationResult {
    if (to - from).num_days() >= MAX_REPORT_DAYS as i64 {
        return Err(ValidationError::new(
            "from",
            format!("Report range cannot exceed {MAX_REPORT_DAYS} days"),
        ));
    }
    Ok(())
}
