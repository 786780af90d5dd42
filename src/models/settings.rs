//! System settings, exchange rates and transfer pricing.
//!
//! Settings are a flat key/value table edited by admins. The keys that
//! drive pricing are parsed into a [`FeeSchedule`]; together with the latest
//! [`ExchangeRate`] it produces a [`Quote`] for any CAD amount.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{ValidationError, ValidationResult};

pub const FEE_PERCENT_KEY: &str = "transfer_fee_percent";
pub const FEE_FIXED_KEY: &str = "transfer_fee_fixed_cents";
pub const MIN_AMOUNT_KEY: &str = "min_transfer_cents";
pub const MAX_AMOUNT_KEY: &str = "max_transfer_cents";

pub const KNOWN_KEYS: &[&str] = &[FEE_PERCENT_KEY, FEE_FIXED_KEY, MIN_AMOUNT_KEY, MAX_AMOUNT_KEY];

/// Represents a row of the `system_settings` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `PUT /api/v1/admin/settings`.
///
/// ```json
/// { "settings": { "transfer_fee_percent": "3", "transfer_fee_fixed_cents": "199" } }
/// ```
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub settings: HashMap<String, String>,
}

/// One entry of the rate history (`exchange_rates` table). The newest row wins.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ExchangeRate {
    pub id: Uuid,
    /// MGA per 1 CAD
    pub rate: Decimal,
    pub source: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SetExchangeRateRequest {
    pub rate: Decimal,
    pub source: Option<String>,
}

impl SetExchangeRateRequest {
    pub fn validate(&self) -> ValidationResult {
        if self.rate <= Decimal::ZERO {
            return Err(ValidationError::new("rate", "Exchange rate must be positive"));
        }
        Ok(())
    }
}

/// Pricing parameters read from system settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSchedule {
    /// Percentage of the CAD amount, e.g. `2.5`
    pub percent: Decimal,
    pub fixed_cents: i64,
    pub min_amount_cents: i64,
    pub max_amount_cents: i64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            percent: Decimal::new(25, 1),
            fixed_cents: 299,
            min_amount_cents: 1_000,
            max_amount_cents: 300_000,
        }
    }
}

impl FeeSchedule {
    /// Parse the pricing keys. Missing keys keep their defaults; malformed
    /// or inconsistent values are rejected.
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let mut schedule = FeeSchedule::default();

        if let Some(raw) = values.get(FEE_PERCENT_KEY) {
            schedule.percent = raw.trim().parse::<Decimal>().map_err(|_| {
                ValidationError::new(FEE_PERCENT_KEY, "Fee percent must be a number")
            })?;
        }
        if let Some(raw) = values.get(FEE_FIXED_KEY) {
            schedule.fixed_cents = parse_cents(FEE_FIXED_KEY, raw)?;
        }
        if let Some(raw) = values.get(MIN_AMOUNT_KEY) {
            schedule.min_amount_cents = parse_cents(MIN_AMOUNT_KEY, raw)?;
        }
        if let Some(raw) = values.get(MAX_AMOUNT_KEY) {
            schedule.max_amount_cents = parse_cents(MAX_AMOUNT_KEY, raw)?;
        }

        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> ValidationResult {
        if self.percent < Decimal::ZERO || self.percent > Decimal::from(20) {
            return Err(ValidationError::new(
                FEE_PERCENT_KEY,
                "Fee percent must be between 0 and 20",
            ));
        }
        if self.fixed_cents < 0 {
            return Err(ValidationError::new(
                FEE_FIXED_KEY,
                "Fixed fee cannot be negative",
            ));
        }
        if self.min_amount_cents <= 0 {
            return Err(ValidationError::new(
                MIN_AMOUNT_KEY,
                "Minimum amount must be positive",
            ));
        }
        if self.max_amount_cents < self.min_amount_cents {
            return Err(ValidationError::new(
                MAX_AMOUNT_KEY,
                "Maximum amount must not be below the minimum amount",
            ));
        }
        Ok(())
    }

    /// Fee in cents: fixed part plus the percentage, rounded half-up to the cent.
    ///
    /// `None` when the fee does not fit in an `i64`.
    pub fn fee_for(&self, amount_cad_cents: i64) -> Option<i64> {
        let variable = Decimal::from(amount_cad_cents)
            .checked_mul(self.percent)?
            .checked_div(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()?;
        self.fixed_cents.checked_add(variable)
    }

    /// Price a transfer of `amount_cad_cents` at `rate` MGA per CAD.
    pub fn quote(&self, amount_cad_cents: i64, rate: Decimal) -> Result<Quote, ValidationError> {
        if amount_cad_cents < self.min_amount_cents {
            return Err(ValidationError::new(
                "amount_cad_cents",
                format!(
                    "Amount must be at least {} CAD",
                    format_cad(self.min_amount_cents)
                ),
            ));
        }
        if amount_cad_cents > self.max_amount_cents {
            return Err(ValidationError::new(
                "amount_cad_cents",
                format!(
                    "Amount must not exceed {} CAD",
                    format_cad(self.max_amount_cents)
                ),
            ));
        }
        if rate <= Decimal::ZERO {
            return Err(ValidationError::new(
                "exchange_rate",
                "No valid exchange rate is configured",
            ));
        }

        let too_large = || ValidationError::new("amount_cad_cents", "Amount is too large");
        let fee_cad_cents = self.fee_for(amount_cad_cents).ok_or_else(too_large)?;
        let total_cad_cents = amount_cad_cents
            .checked_add(fee_cad_cents)
            .ok_or_else(too_large)?;
        let amount_mga = Decimal::from(amount_cad_cents)
            .checked_div(Decimal::ONE_HUNDRED)
            .and_then(|cad| cad.checked_mul(rate))
            .map(|mga| mga.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|mga| mga.to_i64())
            .ok_or_else(too_large)?;

        Ok(Quote {
            amount_cad_cents,
            fee_cad_cents,
            total_cad_cents,
            amount_mga,
            exchange_rate: rate,
        })
    }
}

fn parse_cents(key: &'static str, raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::new(key, format!("{key} must be a whole number of cents")))
}

/// `12345` → `"123.45"`
pub fn format_cad(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

/// Priced transfer, frozen onto the transfer row at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub amount_cad_cents: i64,
    pub fee_cad_cents: i64,
    pub total_cad_cents: i64,
    pub amount_mga: i64,
    pub exchange_rate: Decimal,
}

/// Query string for `GET /api/v1/quote?amount_cad_cents=15000`.
#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub amount_cad_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_quote() {
        let quote = FeeSchedule::default().quote(10_000, dec!(3300)).unwrap();
        // 2.99 fixed + 2.5% of 100.00
        assert_eq!(quote.fee_cad_cents, 549);
        assert_eq!(quote.total_cad_cents, 10_549);
        assert_eq!(quote.amount_mga, 330_000);
    }

    #[test]
    fn fee_rounds_half_up_to_the_cent() {
        let schedule = FeeSchedule {
            percent: dec!(2.5),
            fixed_cents: 0,
            ..FeeSchedule::default()
        };
        // 2.5% of 1.02 = 0.0255 → 3 cents
        assert_eq!(schedule.fee_for(102), Some(3));
        // 2.5% of 1.01 = 0.02525 → 3 cents
        assert_eq!(schedule.fee_for(101), Some(3));
        // 2.5% of 1.00 = 0.025 → 3 cents
        assert_eq!(schedule.fee_for(100), Some(3));
        assert_eq!(schedule.fee_for(99), Some(2));
    }

    #[test]
    fn extreme_settings_are_refused_instead_of_overflowing() {
        let schedule = FeeSchedule {
            fixed_cents: i64::MAX,
            max_amount_cents: i64::MAX,
            ..FeeSchedule::default()
        };
        assert_eq!(schedule.fee_for(10_000), None);
        let err = schedule.quote(10_000, dec!(3300)).unwrap_err();
        assert_eq!(err.message, "Amount is too large");

        let schedule = FeeSchedule {
            fixed_cents: 0,
            percent: dec!(20),
            max_amount_cents: i64::MAX,
            ..FeeSchedule::default()
        };
        assert!(schedule.quote(i64::MAX, dec!(3300)).is_err());
        assert!(FeeSchedule::default().quote(10_000, Decimal::MAX).is_err());
    }

    #[test]
    fn mga_amount_uses_fractional_rate() {
        let quote = FeeSchedule::default()
            .quote(12_345, dec!(3312.456789))
            .unwrap();
        // 123.45 * 3312.456789 = 408922.79...
        assert_eq!(quote.amount_mga, 408_923);
        assert_eq!(quote.exchange_rate, dec!(3312.456789));
    }

    #[test]
    fn amount_bounds_are_enforced() {
        let schedule = FeeSchedule::default();
        let err = schedule.quote(999, dec!(3300)).unwrap_err();
        assert_eq!(err.message, "Amount must be at least 10.00 CAD");
        let err = schedule.quote(300_001, dec!(3300)).unwrap_err();
        assert_eq!(err.message, "Amount must not exceed 3000.00 CAD");
    }

    #[test]
    fn zero_rate_cannot_be_quoted() {
        assert!(FeeSchedule::default().quote(10_000, Decimal::ZERO).is_err());
    }

    #[test]
    fn schedule_from_settings() {
        let schedule = FeeSchedule::from_map(&settings(&[
            (FEE_PERCENT_KEY, "3"),
            (FEE_FIXED_KEY, "199"),
            (MIN_AMOUNT_KEY, "500"),
        ]))
        .unwrap();
        assert_eq!(schedule.percent, dec!(3));
        assert_eq!(schedule.fixed_cents, 199);
        assert_eq!(schedule.min_amount_cents, 500);
        assert_eq!(schedule.max_amount_cents, 300_000);
    }

    #[test]
    fn inconsistent_settings_are_rejected() {
        let err = FeeSchedule::from_map(&settings(&[
            (MIN_AMOUNT_KEY, "5000"),
            (MAX_AMOUNT_KEY, "4000"),
        ]))
        .unwrap_err();
        assert_eq!(err.field, MAX_AMOUNT_KEY);

        let err = FeeSchedule::from_map(&settings(&[(FEE_PERCENT_KEY, "abc")])).unwrap_err();
        assert_eq!(err.field, FEE_PERCENT_KEY);

        let err = FeeSchedule::from_map(&settings(&[(FEE_FIXED_KEY, "-1")])).unwrap_err();
        assert_eq!(err.field, FEE_FIXED_KEY);
    }

    #[test]
    fn cad_formatting() {
        assert_eq!(format_cad(0), "0.00");
        assert_eq!(format_cad(5), "0.05");
        assert_eq!(format_cad(123_456), "1234.56");
    }
}
