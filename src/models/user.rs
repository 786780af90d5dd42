//! User data models and authentication request/response types.
//!
//! This module defines:
//! - `User`: Database entity for every person who can log in
//! - `Role` / `UserStatus`: Access level and account state
//! - Request bodies for registration, login, verification and admin actions
//! - `UserResponse`: Public view of a user (no password or token hashes)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{
    self, NAME_MAX_LEN, ValidationResult, validate_email, validate_max_len, validate_password,
    validate_required,
};

/// Access level of a user.
///
/// - `Client`: lives in Canada, manages beneficiaries and sends money
/// - `Admin`: back office, sees everything, retries and confirms transfers
/// - `MadagascarTeam`: operations team paying out in Madagascar, confirms deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Client,
    Admin,
    MadagascarTeam,
}

/// Account state.
///
/// New accounts start `Inactive` and become `Active` once the email
/// address is verified. `Suspended` accounts are locked by an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table.
///
/// # Secrets
///
/// `password_hash` is an argon2 PHC string. `verification_token_hash` is the
/// SHA-256 hex digest of the token mailed to the user; the raw token is never stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub verification_token_hash: Option<String>,
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub stripe_customer_id: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Response body for user endpoints.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "email": "hery@example.ca",
///   "first_name": "Hery",
///   "last_name": "Rakoto",
///   "phone": "+1 514 555 0101",
///   "role": "CLIENT",
///   "status": "ACTIVE",
///   "email_verified": true,
///   "last_login_at": "2026-03-01T10:00:00Z",
///   "created_at": "2026-02-20T10:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Strips hashes and processor identifiers.
impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            role: user.role,
            status: user.status,
            email_verified: user.email_verified_at.is_some(),
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// Request body for `POST /api/v1/auth/register`.
///
/// ```json
/// {
///   "email": "hery@example.ca",
///   "password": "vanilla2026",
///   "first_name": "Hery",
///   "last_name": "Rakoto",
///   "phone": "+1 514 555 0101"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> ValidationResult {
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        validate_required("first_name", &self.first_name)?;
        validate_max_len("first_name", &self.first_name, NAME_MAX_LEN)?;
        validate_required("last_name", &self.last_name)?;
        validate_max_len("last_name", &self.last_name, NAME_MAX_LEN)?;
        if let Some(phone) = &self.phone {
            validate_max_len("phone", phone, 32)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> ValidationResult {
        validate_required("email", &self.email)?;
        validate_required("password", &self.password)
    }
}

/// Returned by a successful login. `token` goes into `Authorization: Bearer`.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> ValidationResult {
        validate_required("current_password", &self.current_password)?;
        validate_password(&self.new_password)?;
        if self.current_password == self.new_password {
            return Err(validation::ValidationError::new(
                "new_password",
                "New password must differ from the current password",
            ));
        }
        Ok(())
    }
}

/// Admin request creating an operations account (`ADMIN` or `MADAGASCAR_TEAM`).
///
/// Staff accounts skip email verification and start `ACTIVE`.
#[derive(Debug, Deserialize)]
pub struct CreateStaffRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

impl CreateStaffRequest {
    pub fn validate(&self) -> ValidationResult {
        if self.role == Role::Client {
            return Err(validation::ValidationError::new(
                "role",
                "Staff accounts must be ADMIN or MADAGASCAR_TEAM",
            ));
        }
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        validate_required("first_name", &self.first_name)?;
        validate_max_len("first_name", &self.first_name, NAME_MAX_LEN)?;
        validate_required("last_name", &self.last_name)?;
        validate_max_len("last_name", &self.last_name, NAME_MAX_LEN)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

/// Query string for `GET /api/v1/admin/users`.
#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    /// Case-insensitive substring of email or name
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: "Hery".to_string(),
            last_name: "Rakoto".to_string(),
            phone: None,
        }
    }

    #[test]
    fn roles_use_screaming_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(Role::MadagascarTeam).unwrap(),
            "MADAGASCAR_TEAM"
        );
        let status: UserStatus = serde_json::from_str("\"SUSPENDED\"").unwrap();
        assert_eq!(status, UserStatus::Suspended);
    }

    #[test]
    fn register_reports_first_problem() {
        let err = register("not-an-email", "x").validate().unwrap_err();
        assert_eq!(err.field, "email");

        let err = register("hery@example.ca", "x").validate().unwrap_err();
        assert_eq!(err.field, "password");

        assert!(register("hery@example.ca", "vanilla2026").validate().is_ok());
    }

    #[test]
    fn staff_accounts_cannot_be_clients() {
        let req = CreateStaffRequest {
            email: "ops@example.mg".into(),
            password: "antananarivo1".into(),
            first_name: "Fara".into(),
            last_name: "Rabe".into(),
            phone: None,
            role: Role::Client,
        };
        assert_eq!(req.validate().unwrap_err().field, "role");
    }
}
