//! Beneficiary data models and API request types.
//!
//! A beneficiary is a person in Madagascar registered by a client to receive
//! transfers. Beneficiaries are never hard-deleted: `is_active = false` hides
//! them while keeping transfer history intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{
    NAME_MAX_LEN, ValidationError, ValidationResult, validate_max_len, validate_mg_phone,
    validate_required,
};

/// How the money reaches the beneficiary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    /// MVola, Orange Money, Airtel Money
    MobileMoney,
    BankTransfer,
    CashPickup,
}

/// Represents a beneficiary record from the database.
///
/// # Database Table
///
/// Maps to the `beneficiaries` table. Each beneficiary belongs to one user
/// (via `user_id`); every query filters on it.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Beneficiary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    /// Normalized `+261XXXXXXXXX`
    pub phone: String,
    pub delivery_method: DeliveryMethod,
    /// Mobile money operator or bank name
    pub provider: Option<String>,
    /// Bank account or wallet number when it differs from `phone`
    pub account_number: Option<String>,
    pub city: Option<String>,
    pub relationship: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/beneficiaries`.
///
/// # JSON Example
///
/// ```json
/// {
///   "full_name": "Voahangy Randria",
///   "phone": "+261 34 12 345 67",
///   "delivery_method": "MOBILE_MONEY",
///   "provider": "MVola",
///   "city": "Antananarivo",
///   "relationship": "Mother"
/// }
/// ```
///
/// # Validation
///
/// - `full_name`: required, at most 100 characters
/// - `phone`: Madagascar number (`+261` and nine digits)
/// - `provider`: required for mobile money and bank transfers
/// - `account_number`: required for bank transfers
#[derive(Debug, Deserialize)]
pub struct CreateBeneficiaryRequest {
    pub full_name: String,
    pub phone: String,
    pub delivery_method: DeliveryMethod,
    pub provider: Option<String>,
    pub account_number: Option<String>,
    pub city: Option<String>,
    pub relationship: Option<String>,
}

impl CreateBeneficiaryRequest {
    pub fn validate(&self) -> ValidationResult {
        validate_required("full_name", &self.full_name)?;
        validate_max_len("full_name", &self.full_name, NAME_MAX_LEN)?;
        validate_mg_phone("phone", &self.phone)?;
        validate_delivery_details(
            self.delivery_method,
            self.provider.as_deref(),
            self.account_number.as_deref(),
        )?;
        validate_optional_text("city", self.city.as_deref())?;
        validate_optional_text("relationship", self.relationship.as_deref())
    }
}

/// Request body for `PUT /api/v1/beneficiaries/{id}`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateBeneficiaryRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub delivery_method: Option<DeliveryMethod>,
    pub provider: Option<String>,
    pub account_number: Option<String>,
    pub city: Option<String>,
    pub relationship: Option<String>,
}

impl UpdateBeneficiaryRequest {
    /// Validate the fields present in the request against the merged result.
    pub fn validate_against(&self, current: &Beneficiary) -> ValidationResult {
        if let Some(name) = &self.full_name {
            validate_required("full_name", name)?;
            validate_max_len("full_name", name, NAME_MAX_LEN)?;
        }
        if let Some(phone) = &self.phone {
            validate_mg_phone("phone", phone)?;
        }
        let method = self.delivery_method.unwrap_or(current.delivery_method);
        let provider = self.provider.as_deref().or(current.provider.as_deref());
        let account = self
            .account_number
            .as_deref()
            .or(current.account_number.as_deref());
        validate_delivery_details(method, provider, account)?;
        validate_optional_text("city", self.city.as_deref())?;
        validate_optional_text("relationship", self.relationship.as_deref())
    }
}

fn validate_delivery_details(
    method: DeliveryMethod,
    provider: Option<&str>,
    account_number: Option<&str>,
) -> ValidationResult {
    let provider_missing = provider.is_none_or(|p| p.trim().is_empty());
    match method {
        DeliveryMethod::MobileMoney if provider_missing => Err(ValidationError::new(
            "provider",
            "Mobile money beneficiaries need a provider",
        )),
        DeliveryMethod::BankTransfer if provider_missing => Err(ValidationError::new(
            "provider",
            "Bank transfer beneficiaries need a bank name",
        )),
        DeliveryMethod::BankTransfer if account_number.is_none_or(|a| a.trim().is_empty()) => {
            Err(ValidationError::new(
                "account_number",
                "Bank transfer beneficiaries need an account number",
            ))
        }
        _ => Ok(()),
    }
}

fn validate_optional_text(field: &'static str, value: Option<&str>) -> ValidationResult {
    match value {
        Some(v) => validate_max_len(field, v, NAME_MAX_LEN),
        None => Ok(()),
    }
}
