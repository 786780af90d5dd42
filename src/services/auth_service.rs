//! Authentication service - registration, email verification, sessions.
//!
//! # Secrets at rest
//!
//! - Passwords: argon2id PHC strings
//! - Session tokens and verification tokens: 32 random bytes, hex encoded,
//!   handed to the user once; only their SHA-256 hash is stored
//!
//! # Account activation
//!
//! New clients start `INACTIVE`. They become `ACTIVE` only when the token
//! from their verification link matches and has not expired.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::{AppError, on_unique_violation},
    models::{
        notification::{NewNotification, NotificationType},
        user::{
            ChangePasswordRequest, CreateStaffRequest, LoginRequest, LoginResponse,
            RegisterRequest, User, UserStatus,
        },
    },
    services::notification_service,
    validation::ValidationError,
};

/// SHA-256 hex digest of a bearer or verification token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// 64 hex characters (32 random bytes).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("salt encoding failed: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| AppError::Internal(format!("stored password hash is invalid: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2 is deliberately slow; keep it off the async worker threads.
async fn hash_password_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
}

async fn verify_password_blocking(password: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verification task failed: {e}")))?
}

/// Check a presented verification token against the stored one.
///
/// The token must match and the current time must be before the expiry.
pub fn check_verification_token(
    user: &User,
    presented_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    let matches = user.verification_token_hash.as_deref() == Some(presented_hash);
    if !matches {
        return Err(ValidationError::new("token", "Invalid verification token"));
    }
    match user.verification_expires_at {
        Some(expires_at) if now < expires_at => Ok(()),
        _ => Err(ValidationError::new(
            "token",
            "Verification token has expired",
        )),
    }
}

/// Link mailed to the user, e.g. `https://app.example/verify-email?token=...`.
pub fn verification_link(base_url: &str, token: &str) -> Result<String, AppError> {
    let mut url = url::Url::parse(base_url)
        .and_then(|base| base.join("/verify-email"))
        .map_err(|e| AppError::Internal(format!("invalid APP_BASE_URL: {e}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

/// Issue a fresh verification token for `user_id` and deliver the link.
///
/// There is no mail transport in this service; the link is logged for the
/// operator and the outbound mailer picks it up from the log stream.
async fn issue_verification(
    pool: &DbPool,
    config: &Config,
    user_id: Uuid,
    email: &str,
) -> Result<(), AppError> {
    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(config.verification_token_ttl_hours);

    sqlx::query(
        r#"
        UPDATE users
        SET verification_token_hash = $1,
            verification_expires_at = $2,
            updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(hash_token(&token))
    .bind(expires_at)
    .bind(user_id)
    .execute(pool)
    .await?;

    let link = verification_link(&config.app_base_url, &token)?;
    tracing::info!(%user_id, email, %link, "verification email queued");
    Ok(())
}

/// Register a new client account.
///
/// # Process
///
/// 1. Validate input, normalize email to lowercase
/// 2. Reject duplicates
/// 3. Insert user as `CLIENT` / `INACTIVE`
/// 4. Issue verification token
pub async fn register(
    pool: &DbPool,
    config: &Config,
    request: RegisterRequest,
) -> Result<User, AppError> {
    request.validate()?;
    let email = request.email.trim().to_lowercase();

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if exists {
        return Err(AppError::invalid("Email already registered"));
    }

    let password_hash = hash_password_blocking(request.password).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name, phone, role, status)
        VALUES ($1, $2, $3, $4, $5, 'CLIENT', 'INACTIVE')
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(password_hash)
    .bind(request.first_name.trim())
    .bind(request.last_name.trim())
    .bind(request.phone.as_deref().map(str::trim))
    .fetch_one(pool)
    .await
    .map_err(|e| on_unique_violation(e, "Email already registered"))?;

    issue_verification(pool, config, user.id, &user.email).await?;
    tracing::info!(user_id = %user.id, "client registered");

    Ok(user)
}

/// Activate the account owning `token`.
///
/// # Errors
///
/// - `InvalidRequest`: unknown token, or token past its expiry (user stays inactive)
pub async fn verify_email(pool: &DbPool, token: &str) -> Result<User, AppError> {
    if token.trim().is_empty() {
        return Err(AppError::invalid("Verification token is required"));
    }
    let token_hash = hash_token(token.trim());

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE verification_token_hash = $1")
        .bind(&token_hash)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::invalid("Invalid verification token"))?;

    check_verification_token(&user, &token_hash, Utc::now())?;

    // Suspended accounts keep their status; verification only lifts INACTIVE.
    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET status = CASE WHEN status = 'INACTIVE' THEN 'ACTIVE'::user_status ELSE status END,
            email_verified_at = NOW(),
            verification_token_hash = NULL,
            verification_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user.id)
    .fetch_one(pool)
    .await?;

    tracing::info!(user_id = %user.id, "email verified");
    notification_service::notify(
        pool,
        user.id,
        NewNotification::new(
            NotificationType::Account,
            "Welcome!",
            "Your email address is verified. You can now add beneficiaries and send money.",
        ),
    )
    .await;

    Ok(user)
}

/// Send a new verification link. Unknown or already verified addresses are
/// accepted silently so the endpoint does not reveal which emails exist.
pub async fn resend_verification(
    pool: &DbPool,
    config: &Config,
    email: &str,
) -> Result<(), AppError> {
    let email = email.trim().to_lowercase();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    match user {
        Some(user) if user.email_verified_at.is_none() => {
            issue_verification(pool, config, user.id, &user.email).await
        }
        _ => Ok(()),
    }
}

/// Check credentials and open a session.
///
/// # Errors
///
/// - `Unauthorized`: unknown email or wrong password
/// - `InvalidRequest`: email not verified yet, or account suspended
pub async fn login(
    pool: &DbPool,
    config: &Config,
    request: LoginRequest,
) -> Result<LoginResponse, AppError> {
    request.validate()?;
    let email = request.email.trim().to_lowercase();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password_blocking(request.password, user.password_hash.clone()).await? {
        tracing::info!(user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::Unauthorized);
    }

    match user.status {
        UserStatus::Active => {}
        UserStatus::Inactive => {
            return Err(AppError::invalid(
                "Please verify your email address before logging in",
            ));
        }
        UserStatus::Suspended => {
            return Err(AppError::invalid("This account has been suspended"));
        }
    }

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(config.session_ttl_hours);

    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO sessions (user_id, token_hash, expires_at) VALUES ($1, $2, $3)")
        .bind(user.id)
        .bind(hash_token(&token))
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET last_login_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(user_id = %user.id, role = ?user.role, "user logged in");

    Ok(LoginResponse {
        token,
        expires_at,
        user: user.into(),
    })
}

/// Close the session identified by `token_hash`.
pub async fn logout(pool: &DbPool, token_hash: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Change the caller's password and close every other session.
pub async fn change_password(
    pool: &DbPool,
    user_id: Uuid,
    current_token_hash: &str,
    request: ChangePasswordRequest,
) -> Result<(), AppError> {
    request.validate()?;

    let user = find_user(pool, user_id).await?;
    if !verify_password_blocking(request.current_password, user.password_hash).await? {
        return Err(AppError::invalid("Current password is incorrect"));
    }

    let new_hash = hash_password_blocking(request.new_password).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(new_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND token_hash <> $2")
        .bind(user_id)
        .bind(current_token_hash)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(%user_id, "password changed");
    Ok(())
}

/// Create an ADMIN or MADAGASCAR_TEAM account. Staff skip email verification.
pub async fn create_staff(pool: &DbPool, request: CreateStaffRequest) -> Result<User, AppError> {
    request.validate()?;
    let email = request.email.trim().to_lowercase();

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if exists {
        return Err(AppError::invalid("Email already registered"));
    }

    let password_hash = hash_password_blocking(request.password).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name, phone, role, status, email_verified_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'ACTIVE', NOW())
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(password_hash)
    .bind(request.first_name.trim())
    .bind(request.last_name.trim())
    .bind(request.phone.as_deref().map(str::trim))
    .bind(request.role)
    .fetch_one(pool)
    .await
    .map_err(|e| on_unique_violation(e, "Email already registered"))?;

    tracing::info!(user_id = %user.id, role = ?user.role, "staff account created");
    Ok(user)
}

pub async fn find_user(pool: &DbPool, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))
}

/// Delete sessions past their expiry. Returns the number removed.
pub async fn purge_expired_sessions(pool: &DbPool) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;

    fn pending_user(token: &str, expires_at: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "hery@example.ca".into(),
            password_hash: String::new(),
            first_name: "Hery".into(),
            last_name: "Rakoto".into(),
            phone: None,
            role: Role::Client,
            status: UserStatus::Inactive,
            email_verified_at: None,
            verification_token_hash: Some(hash_token(token)),
            verification_expires_at: expires_at,
            stripe_customer_id: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("vanilla2026").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("vanilla2026", &hash).unwrap());
        assert!(!verify_password("vanilla2027", &hash).unwrap());
    }

    #[test]
    fn valid_token_before_expiry() {
        let now = Utc::now();
        let user = pending_user("tok", Some(now + Duration::hours(1)));
        assert!(check_verification_token(&user, &hash_token("tok"), now).is_ok());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let user = pending_user("tok", Some(now - Duration::seconds(1)));
        let err = check_verification_token(&user, &hash_token("tok"), now).unwrap_err();
        assert_eq!(err.message, "Verification token has expired");
    }

    #[test]
    fn token_expiring_exactly_now_is_expired() {
        let now = Utc::now();
        let user = pending_user("tok", Some(now));
        assert!(check_verification_token(&user, &hash_token("tok"), now).is_err());
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let now = Utc::now();
        let user = pending_user("tok", Some(now + Duration::hours(1)));
        let err = check_verification_token(&user, &hash_token("other"), now).unwrap_err();
        assert_eq!(err.message, "Invalid verification token");
    }

    #[test]
    fn verification_link_carries_token() {
        let link = verification_link("https://app.example.ca/", "abc123").unwrap();
        assert_eq!(link, "https://app.example.ca/verify-email?token=abc123");
    }

    async fn insert_unverified(pool: &DbPool, token: &str, expires_at: DateTime<Utc>) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO users (
                email, password_hash, first_name, last_name, verification_token_hash,
                verification_expires_at
            )
            VALUES ('hery@example.com', 'not-a-hash', 'Hery', 'Rakoto', $1, $2)
            RETURNING id
            "#,
        )
        .bind(hash_token(token))
        .bind(expires_at)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    #[ignore = "requires Postgres"]
    async fn expired_token_leaves_the_account_inactive(pool: DbPool) {
        let user_id = insert_unverified(&pool, "tok_expired", Utc::now() - Duration::hours(1)).await;

        let err = verify_email(&pool, "tok_expired").await.unwrap_err();
        assert!(
            matches!(err, AppError::InvalidRequest(ref m) if m == "Verification token has expired"),
            "{err:?}"
        );

        let user = find_user(&pool, user_id).await.unwrap();
        assert_eq!(user.status, UserStatus::Inactive);
        assert!(user.email_verified_at.is_none());
    }

    #[sqlx::test]
    #[ignore = "requires Postgres"]
    async fn valid_token_activates_once(pool: DbPool) {
        let user_id = insert_unverified(&pool, "tok_fresh", Utc::now() + Duration::hours(1)).await;

        let user = verify_email(&pool, "tok_fresh").await.unwrap();
        assert_eq!(user.id, user_id);
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.email_verified_at.is_some());

        let err = verify_email(&pool, "tok_fresh").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(ref m) if m == "Invalid verification token"));
    }

    #[sqlx::test]
    #[ignore = "requires Postgres"]
    async fn duplicate_registration_is_a_bad_request(pool: DbPool) {
        let config = Config::for_tests();
        let request = || RegisterRequest {
            email: "Hery@Example.com".into(),
            password: "correct horse 42".into(),
            first_name: "Hery".into(),
            last_name: "Rakoto".into(),
            phone: None,
        };

        register(&pool, &config, request()).await.unwrap();
        let err = register(&pool, &config, request()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(ref m) if m == "Email already registered"));
    }
}
