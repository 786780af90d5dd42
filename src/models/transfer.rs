//! Transfer data models, status rules and API request types.
//!
//! This module defines:
//! - `Transfer`: Database entity for one movement of funds CAD → MGA
//! - `TransferStatus`: The `PENDING → COMPLETED | FAILED` lifecycle
//! - `RetryPlan`: What an admin retry does for a given transfer
//! - Request and filter types for client, team and admin endpoints

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::beneficiary::DeliveryMethod;
use crate::validation::{
    NOTE_MAX_LEN, ValidationError, ValidationResult, contains_pattern, validate_max_len,
    validate_positive_amount, validate_required,
};

/// Transfer lifecycle.
///
/// ```text
///   create ──▶ PENDING ──confirm──▶ COMPLETED
///                 │  ▲
///          fail   │  │ retry (admin)
///                 ▼  │
///               FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        }
    }

    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Failed, Pending)
        )
    }

    /// Check `self -> next` against the lifecycle, with a message naming the
    /// action that was refused.
    pub fn ensure_transition(self, next: TransferStatus) -> ValidationResult {
        if self.can_transition_to(next) {
            return Ok(());
        }
        let (required, action) = match next {
            TransferStatus::Pending => ("FAILED", "retried"),
            TransferStatus::Completed => ("PENDING", "confirmed"),
            TransferStatus::Failed => ("PENDING", "marked failed"),
        };
        Err(ValidationError::new(
            "status",
            format!(
                "Only {required} transfers can be {action} (current status: {})",
                self.as_str()
            ),
        ))
    }
}

/// Represents a transfer record from the database.
///
/// # Database Table
///
/// Maps to the `transfers` table.
///
/// # Amounts
///
/// - `amount_cad_cents`: what the beneficiary's side is computed from
/// - `fee_cad_cents`: service fee charged on top
/// - `total_cad_cents`: amount + fee, what the client pays
/// - `amount_mga`: whole ariary delivered, `amount_cad * exchange_rate` rounded
/// - `exchange_rate`: MGA per CAD at creation time, frozen on the row
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transfer {
    pub id: Uuid,
    /// Human-friendly reference quoted on receipts, e.g. `MT-20261017-4F2A9C`
    pub reference: String,
    pub user_id: Uuid,
    pub beneficiary_id: Uuid,
    /// Set when the transfer was generated by a subscription
    pub subscription_id: Option<Uuid>,
    pub amount_cad_cents: i64,
    pub fee_cad_cents: i64,
    pub total_cad_cents: i64,
    pub amount_mga: i64,
    pub exchange_rate: Decimal,
    pub status: TransferStatus,
    pub failure_reason: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub confirmation_note: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Decide what an admin retry does for this transfer.
    pub fn retry_plan(&self) -> Result<RetryPlan, ValidationError> {
        self.status.ensure_transition(TransferStatus::Pending)?;
        Ok(match self.subscription_id {
            Some(subscription_id) => RetryPlan::PayLatestInvoice { subscription_id },
            None => RetryPlan::ManualReview,
        })
    }
}

/// Outcome of [`Transfer::retry_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPlan {
    /// Subscription transfer: pay the subscription's latest open invoice,
    /// then move back to PENDING.
    PayLatestInvoice { subscription_id: Uuid },
    /// One-time transfer: move back to PENDING for manual handling.
    ManualReview,
}

/// Transfer joined with its beneficiary and client, for the payout team and admins.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransferDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub transfer: Transfer,
    pub beneficiary_name: String,
    pub beneficiary_phone: String,
    pub delivery_method: DeliveryMethod,
    pub provider: Option<String>,
    pub account_number: Option<String>,
    pub client_name: String,
    pub client_email: String,
}

/// Request body for `POST /api/v1/transfers` (one-time transfer).
///
/// ```json
/// {
///   "beneficiary_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cad_cents": 20000
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub beneficiary_id: Uuid,
    pub amount_cad_cents: i64,
}

impl CreateTransferRequest {
    pub fn validate(&self) -> ValidationResult {
        validate_positive_amount("amount_cad_cents", self.amount_cad_cents)
    }
}

/// Response to a one-time transfer creation.
///
/// `payment_client_secret` is present when the payment processor is enabled;
/// the browser uses it to complete the card payment.
#[derive(Debug, Serialize)]
pub struct CreateTransferResponse {
    pub transfer: Transfer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_client_secret: Option<String>,
}

/// Body of the confirm endpoints (admin and Madagascar team).
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmTransferRequest {
    pub note: Option<String>,
}

impl ConfirmTransferRequest {
    pub fn validate(&self) -> ValidationResult {
        match &self.note {
            Some(note) => validate_max_len("note", note, NOTE_MAX_LEN),
            None => Ok(()),
        }
    }
}

/// Body of `POST /api/v1/team/transfers/{id}/fail`.
#[derive(Debug, Deserialize)]
pub struct FailTransferRequest {
    pub reason: String,
}

impl FailTransferRequest {
    pub fn validate(&self) -> ValidationResult {
        validate_required("reason", &self.reason)?;
        validate_max_len("reason", &self.reason, NOTE_MAX_LEN)
    }
}

/// Query string filters for transfer listings.
///
/// All fields are optional; `from`/`to` are inclusive calendar dates (UTC).
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    pub beneficiary_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Substring of the transfer reference
    pub reference: Option<String>,
}

impl TransferFilter {
    pub fn validate(&self) -> ValidationResult {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ValidationError::new("from", "`from` must not be after `to`"));
            }
        }
        Ok(())
    }

    /// Append `AND ...` clauses for every set field. Columns are qualified with `t.`.
    pub fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if let Some(status) = self.status {
            qb.push(" AND t.status = ").push_bind(status);
        }
        if let Some(beneficiary_id) = self.beneficiary_id {
            qb.push(" AND t.beneficiary_id = ").push_bind(beneficiary_id);
        }
        if let Some(subscription_id) = self.subscription_id {
            qb.push(" AND t.subscription_id = ").push_bind(subscription_id);
        }
        if let Some(user_id) = self.user_id {
            qb.push(" AND t.user_id = ").push_bind(user_id);
        }
        if let Some(from) = self.from {
            qb.push(" AND t.created_at >= ").push_bind(from);
        }
        if let Some(to) = self.to {
            qb.push(" AND t.created_at < ")
                .push_bind(to)
                .push(" + INTERVAL '1 day'");
        }
        if let Some(reference) = self.reference.as_deref().filter(|r| !r.trim().is_empty()) {
            qb.push(" AND t.reference ILIKE ")
                .push_bind(contains_pattern(reference.trim()));
        }
    }
}

/// Generate a transfer reference: `MT-<yyyymmdd>-<6 hex chars>`.
pub fn generate_reference(now: DateTime<Utc>) -> String {
    let suffix: [u8; 3] = rand::random();
    format!(
        "MT-{}-{}",
        now.format("%Y%m%d"),
        hex::encode_upper(suffix)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_transfer(status: TransferStatus, subscription_id: Option<Uuid>) -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            reference: "MT-20261017-ABCDEF".into(),
            user_id: Uuid::new_v4(),
            beneficiary_id: Uuid::new_v4(),
            subscription_id,
            amount_cad_cents: 10_000,
            fee_cad_cents: 549,
            total_cad_cents: 10_549,
            amount_mga: 330_000,
            exchange_rate: dec!(3300),
            status,
            failure_reason: None,
            stripe_invoice_id: None,
            stripe_payment_intent_id: None,
            confirmed_at: None,
            confirmed_by: None,
            confirmation_note: None,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use TransferStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn retry_requires_failed_status() {
        for status in [TransferStatus::Pending, TransferStatus::Completed] {
            let err = sample_transfer(status, None).retry_plan().unwrap_err();
            assert!(err.message.starts_with("Only FAILED transfers can be retried"));
        }
    }

    #[test]
    fn retry_plan_depends_on_subscription_link() {
        let subscription_id = Uuid::new_v4();
        assert_eq!(
            sample_transfer(TransferStatus::Failed, Some(subscription_id))
                .retry_plan()
                .unwrap(),
            RetryPlan::PayLatestInvoice { subscription_id }
        );
        assert_eq!(
            sample_transfer(TransferStatus::Failed, None)
                .retry_plan()
                .unwrap(),
            RetryPlan::ManualReview
        );
    }

    #[test]
    fn confirm_requires_pending() {
        assert!(
            TransferStatus::Pending
                .ensure_transition(TransferStatus::Completed)
                .is_ok()
        );
        let err = TransferStatus::Completed
            .ensure_transition(TransferStatus::Completed)
            .unwrap_err();
        assert_eq!(
            err.message,
            "Only PENDING transfers can be confirmed (current status: COMPLETED)"
        );
        let err = TransferStatus::Failed
            .ensure_transition(TransferStatus::Failed)
            .unwrap_err();
        assert_eq!(
            err.message,
            "Only PENDING transfers can be marked failed (current status: FAILED)"
        );
    }

    #[test]
    fn reference_format() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 10, 17, 8, 0, 0).unwrap();
        let reference = generate_reference(now);
        assert!(reference.starts_with("MT-20261017-"));
        assert_eq!(reference.len(), "MT-20261017-".len() + 6);
    }

    #[test]
    fn filter_builds_parameterized_sql() {
        let filter = TransferFilter {
            status: Some(TransferStatus::Failed),
            from: NaiveDate::from_ymd_opt(2026, 10, 1),
            to: NaiveDate::from_ymd_opt(2026, 10, 31),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT t.* FROM transfers t WHERE 1 = 1");
        filter.push_conditions(&mut qb);
        assert_eq!(
            qb.sql(),
            "SELECT t.* FROM transfers t WHERE 1 = 1 AND t.status = $1 AND t.created_at >= $2 \
             AND t.created_at < $3 + INTERVAL '1 day'"
        );
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let filter = TransferFilter {
            from: NaiveDate::from_ymd_opt(2026, 10, 31),
            to: NaiveDate::from_ymd_opt(2026, 10, 1),
            ..Default::default()
        };
        assert!(filter.validate().is_err());
    }
}
