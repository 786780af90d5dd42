//! Subscription data models: recurring transfers to one beneficiary.
//!
//! A subscription is charged by the payment processor on its own schedule;
//! the scheduled job creates one transfer per period using
//! `next_transfer_date`.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{ValidationError, ValidationResult, validate_positive_amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_frequency", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl Frequency {
    /// Date of the following transfer.
    ///
    /// Monthly schedules clamp to the end of shorter months
    /// (January 31st is followed by the last day of February).
    pub fn advance(self, from: NaiveDate) -> NaiveDate {
        let next = match self {
            Frequency::Weekly => from.checked_add_days(Days::new(7)),
            Frequency::Biweekly => from.checked_add_days(Days::new(14)),
            Frequency::Monthly => from.checked_add_months(Months::new(1)),
        };
        next.unwrap_or(NaiveDate::MAX)
    }

    /// Billing interval understood by the payment processor: (unit, count).
    pub fn billing_interval(self) -> (&'static str, u32) {
        match self {
            Frequency::Weekly => ("week", 1),
            Frequency::Biweekly => ("week", 2),
            Frequency::Monthly => ("month", 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    /// ACTIVE and PAUSED move between each other; both may be cancelled;
    /// CANCELLED is final.
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Active, Paused) | (Paused, Active) | (Active, Cancelled) | (Paused, Cancelled)
        )
    }

    pub fn ensure_transition(self, next: SubscriptionStatus) -> ValidationResult {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ValidationError::new(
                "status",
                format!(
                    "Cannot change a {} subscription to {}",
                    self.as_str(),
                    next.as_str()
                ),
            ))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Represents a subscription record from the database.
///
/// # Database Table
///
/// Maps to the `subscriptions` table. `stripe_subscription_id` is `None`
/// when the processor is disabled; such subscriptions still produce
/// transfers that are settled manually.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub beneficiary_id: Uuid,
    pub amount_cad_cents: i64,
    pub frequency: Frequency,
    pub status: SubscriptionStatus,
    pub next_transfer_date: NaiveDate,
    pub stripe_subscription_id: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/subscriptions`.
///
/// ```json
/// {
///   "beneficiary_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cad_cents": 15000,
///   "frequency": "MONTHLY",
///   "start_date": "2026-11-01"
/// }
/// ```
///
/// `start_date` defaults to today and may not be in the past.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub beneficiary_id: Uuid,
    pub amount_cad_cents: i64,
    pub frequency: Frequency,
    pub start_date: Option<NaiveDate>,
}

impl CreateSubscriptionRequest {
    pub fn validate(&self, today: NaiveDate) -> ValidationResult {
        validate_positive_amount("amount_cad_cents", self.amount_cad_cents)?;
        if let Some(start) = self.start_date {
            if start < today {
                return Err(ValidationError::new(
                    "start_date",
                    "Start date cannot be in the past",
                ));
            }
        }
        Ok(())
    }
}

/// Request body for `PUT /api/v1/subscriptions/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub amount_cad_cents: Option<i64>,
    pub frequency: Option<Frequency>,
}

impl UpdateSubscriptionRequest {
    pub fn validate(&self) -> ValidationResult {
        if self.amount_cad_cents.is_none() && self.frequency.is_none() {
            return Err(ValidationError::new(
                "amount_cad_cents",
                "Nothing to update",
            ));
        }
        if let Some(amount) = self.amount_cad_cents {
            validate_positive_amount("amount_cad_cents", amount)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn advance_by_frequency() {
        let start = date(2026, 10, 17);
        assert_eq!(Frequency::Weekly.advance(start), date(2026, 10, 24));
        assert_eq!(Frequency::Biweekly.advance(start), date(2026, 10, 31));
        assert_eq!(Frequency::Monthly.advance(start), date(2026, 11, 17));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        assert_eq!(Frequency::Monthly.advance(date(2027, 1, 31)), date(2027, 2, 28));
        assert_eq!(Frequency::Monthly.advance(date(2028, 1, 31)), date(2028, 2, 29));
    }

    #[test]
    fn cancelled_is_final() {
        use SubscriptionStatus::*;
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Paused));
        assert!(!Active.can_transition_to(Active));
        assert!(Cancelled.ensure_transition(Active).is_err());
    }

    #[test]
    fn start_date_cannot_be_in_the_past() {
        let req = CreateSubscriptionRequest {
            beneficiary_id: Uuid::new_v4(),
            amount_cad_cents: 10_000,
            frequency: Frequency::Monthly,
            start_date: Some(date(2026, 1, 1)),
        };
        assert_eq!(
            req.validate(date(2026, 10, 17)).unwrap_err().field,
            "start_date"
        );
    }

    #[test]
    fn biweekly_bills_every_two_weeks() {
        assert_eq!(Frequency::Biweekly.billing_interval(), ("week", 2));
    }
}
