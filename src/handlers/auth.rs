//! Authentication HTTP handlers.
//!
//! - POST /api/v1/auth/register - Create a client account (inactive until verified)
//! - POST /api/v1/auth/verify-email - Activate an account with the emailed token
//! - POST /api/v1/auth/resend-verification - Issue a fresh verification token
//! - POST /api/v1/auth/login - Open a session, returns a bearer token
//! - POST /api/v1/auth/logout - Close the current session
//! - GET /api/v1/auth/me - Current user
//! - PUT /api/v1/auth/password - Change password, closes other sessions

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::{
    app::AppState,
    db::DbPool,
    error::AppError,
    extract::AppJson,
    middleware::auth::AuthContext,
    models::user::{
        ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest,
        ResendVerificationRequest, UserResponse, VerifyEmailRequest,
    },
    services::auth_service,
};

/// `POST /api/v1/auth/register`
///
/// # Request Body
///
/// ```json
/// {
///   "email": "hery@example.ca",
///   "password": "s3cretpass",
///   "first_name": "Hery",
///   "last_name": "Rakoto",
///   "phone": "+1 514 555 0101"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the new (INACTIVE) user
/// - **400**: invalid input or email already registered
pub async fn register(
    State(state): State<AppState>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth_service::register(&state.pool, &state.config, request).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// `POST /api/v1/auth/verify-email`
///
/// - **200 OK**: the activated user
/// - **400**: unknown or expired token
pub async fn verify_email(
    State(pool): State<DbPool>,
    AppJson(request): AppJson<VerifyEmailRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::verify_email(&pool, &request.token).await?;
    Ok(Json(user.into()))
}

/// `POST /api/v1/auth/resend-verification`
///
/// Always answers 200 so the endpoint does not reveal which accounts exist.
pub async fn resend_verification(
    State(state): State<AppState>,
    AppJson(request): AppJson<ResendVerificationRequest>,
) -> Result<Json<Value>, AppError> {
    auth_service::resend_verification(&state.pool, &state.config, &request.email).await?;
    Ok(Json(json!({
        "message": "If the account exists and is not verified, a new link has been sent"
    })))
}

/// `POST /api/v1/auth/login`
///
/// # Response
///
/// ```json
/// {
///   "token": "9c1e...",
///   "expires_at": "2026-10-24T10:00:00Z",
///   "user": { "id": "...", "role": "CLIENT", ... }
/// }
/// ```
///
/// - **401**: wrong email or password
/// - **400**: account not verified or suspended
pub async fn login(
    State(state): State<AppState>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = auth_service::login(&state.pool, &state.config, request).await?;
    Ok(Json(response))
}

pub async fn logout(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    auth_service::logout(&pool, &auth.token_hash).await?;
    tracing::info!(user_id = %auth.user_id, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth_service::find_user(&pool, auth.user_id).await?;
    Ok(Json(user.into()))
}

pub async fn change_password(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    auth_service::change_password(&pool, auth.user_id, &auth.token_hash, request).await?;
    Ok(StatusCode::NO_CONTENT)
}
