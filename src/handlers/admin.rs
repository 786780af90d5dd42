//! Admin HTTP handlers.
//!
//! Users:
//! - GET /api/v1/admin/users - Filter by role/status, search by email or name
//! - POST /api/v1/admin/users - Create an ADMIN or MADAGASCAR_TEAM account
//! - GET /api/v1/admin/users/{id}
//! - PUT /api/v1/admin/users/{id}/status
//!
//! Transfers:
//! - GET /api/v1/admin/transfers
//! - GET /api/v1/admin/transfers/{id}
//! - POST /api/v1/admin/transfers/{id}/retry
//! - POST /api/v1/admin/transfers/{id}/confirm
//!
//! Reporting, settings and operations:
//! - GET /api/v1/admin/stats
//! - GET /api/v1/admin/reports/daily
//! - GET|PUT /api/v1/admin/settings
//! - GET|POST /api/v1/admin/exchange-rates
//! - GET /api/v1/admin/jobs, POST /api/v1/admin/jobs/start|stop|run
//! - POST /api/v1/admin/rate-limits/clear

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    app::AppState,
    db::DbPool,
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    middleware::auth::AuthContext,
    models::{
        pagination::{Page, PageParams},
        report::{AdminStats, DailyReportRow, ReportRange},
        settings::{ExchangeRate, SetExchangeRateRequest, SystemSetting, UpdateSettingsRequest},
        transfer::{ConfirmTransferRequest, Transfer, TransferDetails, TransferFilter},
        user::{CreateStaffRequest, UpdateUserStatusRequest, UserFilter, UserResponse},
    },
    services::{
        auth_service, report_service, scheduler::{JobRunSummary, JobStatus}, settings_service,
        transfer_service::{self, SortOrder},
        user_service,
    },
};

// ---- users ----

pub async fn list_users(
    State(pool): State<DbPool>,
    AppQuery(filter): AppQuery<UserFilter>,
    AppQuery(page): AppQuery<PageParams>,
) -> Result<Json<Page<UserResponse>>, AppError> {
    let users = user_service::list(&pool, &filter, page).await?;
    Ok(Json(Page {
        items: users.items.into_iter().map(UserResponse::from).collect(),
        page: users.page,
        limit: users.limit,
        total: users.total,
    }))
}

/// `POST /api/v1/admin/users`
///
/// ```json
/// {
///   "email": "ops@example.mg",
///   "password": "s3cretpass",
///   "first_name": "Fara",
///   "last_name": "Rabe",
///   "role": "MADAGASCAR_TEAM"
/// }
/// ```
///
/// Staff accounts are created ACTIVE and pre-verified.
pub async fn create_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<CreateStaffRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth_service::create_staff(&pool, request).await?;
    tracing::info!(admin_id = %auth.user_id, user_id = %user.id, role = ?user.role, "staff account created");
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn get_user(
    State(pool): State<DbPool>,
    AppPath(user_id): AppPath<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(auth_service::find_user(&pool, user_id).await?.into()))
}

pub async fn update_user_status(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(user_id): AppPath<Uuid>,
    AppJson(request): AppJson<UpdateUserStatusRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::update_status(&pool, auth.user_id, user_id, request.status).await?;
    Ok(Json(user.into()))
}

// ---- transfers ----

pub async fn list_transfers(
    State(pool): State<DbPool>,
    AppQuery(filter): AppQuery<TransferFilter>,
    AppQuery(page): AppQuery<PageParams>,
) -> Result<Json<Page<TransferDetails>>, AppError> {
    let transfers =
        transfer_service::list_details(&pool, &filter, page, SortOrder::NewestFirst).await?;
    Ok(Json(transfers))
}

pub async fn get_transfer(
    State(pool): State<DbPool>,
    AppPath(transfer_id): AppPath<Uuid>,
) -> Result<Json<TransferDetails>, AppError> {
    Ok(Json(transfer_service::get_details(&pool, transfer_id).await?))
}

/// `POST /api/v1/admin/transfers/{id}/retry`
///
/// # Response
///
/// - **200 OK**: the transfer, back in PENDING with `retry_count` incremented
/// - **400**: the transfer is not FAILED, or the payment processor refused
///   the invoice payment (the transfer stays FAILED)
/// - **404**: unknown transfer
pub async fn retry_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppPath(transfer_id): AppPath<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    let transfer =
        transfer_service::retry(&state.pool, state.payments.as_ref(), transfer_id, auth.user_id)
            .await?;
    Ok(Json(transfer))
}

pub async fn confirm_transfer(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(transfer_id): AppPath<Uuid>,
    request: Option<AppJson<ConfirmTransferRequest>>,
) -> Result<Json<Transfer>, AppError> {
    let request = request.map(|AppJson(r)| r).unwrap_or_default();
    let transfer = transfer_service::confirm(&pool, transfer_id, auth.user_id, request).await?;
    Ok(Json(transfer))
}

// ---- reporting ----

pub async fn stats(State(pool): State<DbPool>) -> Result<Json<AdminStats>, AppError> {
    Ok(Json(report_service::admin_stats(&pool).await?))
}

/// `GET /api/v1/admin/reports/daily?from=2026-10-01&to=2026-10-17`
pub async fn daily_report(
    State(pool): State<DbPool>,
    AppQuery(range): AppQuery<ReportRange>,
) -> Result<Json<Vec<DailyReportRow>>, AppError> {
    Ok(Json(report_service::daily_report(&pool, &range).await?))
}

// ---- settings ----

pub async fn get_settings(State(pool): State<DbPool>) -> Result<Json<Vec<SystemSetting>>, AppError> {
    Ok(Json(settings_service::list_settings(&pool).await?))
}

/// `PUT /api/v1/admin/settings`
///
/// ```json
/// { "settings": { "transfer_fee_percent": "2.0", "max_transfer_cents": "500000" } }
/// ```
///
/// All keys are applied in one transaction, or none are.
pub async fn update_settings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<UpdateSettingsRequest>,
) -> Result<Json<Vec<SystemSetting>>, AppError> {
    Ok(Json(
        settings_service::update_settings(&pool, auth.user_id, request.settings).await?,
    ))
}

pub async fn list_exchange_rates(
    State(pool): State<DbPool>,
    AppQuery(page): AppQuery<PageParams>,
) -> Result<Json<Page<ExchangeRate>>, AppError> {
    Ok(Json(settings_service::rate_history(&pool, page).await?))
}

/// `POST /api/v1/admin/exchange-rates`
///
/// ```json
/// { "rate": "3312.50", "source": "BFM fixing" }
/// ```
pub async fn set_exchange_rate(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<SetExchangeRateRequest>,
) -> Result<(StatusCode, Json<ExchangeRate>), AppError> {
    let rate = settings_service::set_rate(&pool, auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(rate)))
}

// ---- operations ----

pub async fn job_status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.scheduler.status().await)
}

/// `POST /api/v1/admin/jobs/start`
///
/// ```json
/// { "started": true, "running": true }
/// ```
///
/// `started` is false when the jobs were already running.
pub async fn start_jobs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let started = state.scheduler.start().await;
    tracing::info!(admin_id = %auth.user_id, started, "scheduled jobs start requested");
    Json(json!({ "started": started, "running": true }))
}

pub async fn stop_jobs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let stopped = state.scheduler.stop().await;
    tracing::info!(admin_id = %auth.user_id, stopped, "scheduled jobs stop requested");
    Json(json!({ "stopped": stopped, "running": false }))
}

pub async fn run_jobs(State(state): State<AppState>) -> Result<Json<JobRunSummary>, AppError> {
    Ok(Json(state.scheduler.run_once().await?))
}

pub async fn clear_rate_limits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let cleared = state.auth_limiter.clear().await;
    tracing::info!(admin_id = %auth.user_id, cleared, "rate limits cleared");
    Json(json!({ "cleared": cleared }))
}
