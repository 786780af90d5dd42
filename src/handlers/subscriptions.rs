//! Subscription HTTP handlers (client only).
//!
//! - GET /api/v1/subscriptions
//! - POST /api/v1/subscriptions - Start a recurring transfer
//! - GET /api/v1/subscriptions/{id}
//! - PUT /api/v1/subscriptions/{id} - Change amount and/or frequency
//! - POST /api/v1/subscriptions/{id}/pause
//! - POST /api/v1/subscriptions/{id}/resume
//! - POST /api/v1/subscriptions/{id}/cancel

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    app::AppState,
    db::DbPool,
    error::AppError,
    extract::{AppJson, AppPath},
    middleware::auth::AuthContext,
    models::subscription::{CreateSubscriptionRequest, Subscription, UpdateSubscriptionRequest},
    services::subscription_service,
};

pub async fn list_subscriptions(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    Ok(Json(subscription_service::list(&pool, auth.user_id).await?))
}

/// `POST /api/v1/subscriptions`
///
/// # Request Body
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
/// # Response
///
/// - **201 Created**: the subscription
/// - **400**: invalid amount or start date, or the processor refused
/// - **404**: beneficiary unknown or deleted
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let subscription =
        subscription_service::create(&state.pool, state.payments.as_ref(), auth.user_id, request)
            .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(subscription_id): AppPath<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(
        subscription_service::get(&pool, auth.user_id, subscription_id).await?,
    ))
}

pub async fn update_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(subscription_id): AppPath<Uuid>,
    AppJson(request): AppJson<UpdateSubscriptionRequest>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = subscription_service::update(
        &state.pool,
        state.payments.as_ref(),
        auth.user_id,
        subscription_id,
        request,
    )
    .await?;
    Ok(Json(subscription))
}

pub async fn pause_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(subscription_id): AppPath<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription =
        subscription_service::pause(&state.pool, state.payments.as_ref(), auth.user_id, subscription_id)
            .await?;
    Ok(Json(subscription))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(subscription_id): AppPath<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription =
        subscription_service::resume(&state.pool, state.payments.as_ref(), auth.user_id, subscription_id)
            .await?;
    Ok(Json(subscription))
}

/// `POST /api/v1/subscriptions/{id}/cancel`
///
/// Cancelling is final; a cancelled subscription cannot be resumed.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(subscription_id): AppPath<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription =
        subscription_service::cancel(&state.pool, state.payments.as_ref(), auth.user_id, subscription_id)
            .await?;
    Ok(Json(subscription))
}
