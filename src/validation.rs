//! Input validation helpers shared by request types.
//!
//! Every request type exposes a `validate` method that stops at the first
//! failing rule; the resulting [`ValidationError`] becomes a 400 response
//! carrying that rule's message.

use std::fmt;

pub const NAME_MAX_LEN: usize = 100;
pub const EMAIL_MAX_LEN: usize = 254;
pub const NOTE_MAX_LEN: usize = 500;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, format!("{field} is required")));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("{field} must be at most {max_len} characters"),
        ));
    }

    Ok(())
}

/// Shape check only: one `@`, non-empty local part, dotted domain.
pub fn validate_email(value: &str) -> ValidationResult {
    let value = value.trim();
    validate_max_len("email", value, EMAIL_MAX_LEN)?;

    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(ValidationError::new("email", "Invalid email address"));
    }

    Ok(())
}

pub fn validate_password(value: &str) -> ValidationResult {
    if value.chars().count() < PASSWORD_MIN_LEN {
        return Err(ValidationError::new(
            "password",
            format!("Password must be at least {PASSWORD_MIN_LEN} characters"),
        ));
    }
    validate_max_len("password", value, PASSWORD_MAX_LEN)?;

    let has_letter = value.chars().any(|c| c.is_alphabetic());
    let has_digit = value.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ValidationError::new(
            "password",
            "Password must contain at least one letter and one digit",
        ));
    }

    Ok(())
}

/// Madagascar numbers: `+261` followed by nine digits. Spaces are ignored.
pub fn validate_mg_phone(field: &'static str, value: &str) -> ValidationResult {
    let compact = normalize_phone(value);
    let digits = compact.strip_prefix("+261");

    match digits {
        Some(rest) if rest.len() == 9 && rest.chars().all(|c| c.is_ascii_digit()) => Ok(()),
        _ => Err(ValidationError::new(
            field,
            "Phone number must be in the format +261 XX XX XXX XX",
        )),
    }
}

/// Strip spaces, dashes and dots from a phone number.
pub fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.'))
        .collect()
}

pub fn validate_positive_amount(field: &'static str, cents: i64) -> ValidationResult {
    if cents <= 0 {
        return Err(ValidationError::new(
            field,
            "Amount must be greater than zero",
        ));
    }

    Ok(())
}

/// `%value%` for an `ILIKE` match, with the LIKE wildcards in `value`
/// escaped so they match literally.
pub fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_blank() {
        assert!(validate_required("first_name", "  ").is_err());
        assert!(validate_required("first_name", "Rado").is_ok());
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("rakoto@example.mg").is_ok());
        assert!(validate_email("rakoto@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ra koto@example.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn password_needs_letters_and_digits() {
        assert!(validate_password("short1").is_err());
        assert!(validate_password("onlyletters").is_err());
        assert!(validate_password("12345678").is_err());
        assert!(validate_password("vanilla2024").is_ok());
    }

    #[test]
    fn madagascar_phone_numbers() {
        assert!(validate_mg_phone("phone", "+261 34 12 345 67").is_ok());
        assert!(validate_mg_phone("phone", "+261341234567").is_ok());
        assert!(validate_mg_phone("phone", "0341234567").is_err());
        assert!(validate_mg_phone("phone", "+26134123456").is_err());
        assert!(validate_mg_phone("phone", "+2613412345a7").is_err());
    }

    #[test]
    fn first_failure_message_is_kept() {
        let err = validate_positive_amount("amount_cad_cents", 0).unwrap_err();
        assert_eq!(err.field, "amount_cad_cents");
        assert_eq!(err.message, "Amount must be greater than zero");
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(contains_pattern("rakoto"), "%rakoto%");
        assert_eq!(contains_pattern("100%_off"), "%100\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }
}
