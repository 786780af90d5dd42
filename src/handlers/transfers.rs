//! Client transfer HTTP handlers.
//!
//! - GET /api/v1/transfers - Own transfers, filtered and paginated
//! - POST /api/v1/transfers - One-time transfer
//! - GET /api/v1/transfers/{id}

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
    extract::{AppJson, AppPath, AppQuery},
    middleware::auth::AuthContext,
    models::{
        pagination::{Page, PageParams},
        transfer::{CreateTransferRequest, CreateTransferResponse, Transfer, TransferFilter},
    },
    services::transfer_service,
};

/// `GET /api/v1/transfers?status=PENDING&from=2026-10-01&page=1&limit=20`
pub async fn list_transfers(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppQuery(filter): AppQuery<TransferFilter>,
    AppQuery(page): AppQuery<PageParams>,
) -> Result<Json<Page<Transfer>>, AppError> {
    let transfers = transfer_service::list_for_user(&pool, auth.user_id, filter, page).await?;
    Ok(Json(transfers))
}

/// `POST /api/v1/transfers`
///
/// # Request Body
///
/// ```json
/// {
///   "beneficiary_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cad_cents": 20000
/// }
/// ```
///
/// # Response (201 Created)
///
/// ```json
/// {
///   "transfer": { "reference": "MT-20261017-4F2A9C", "status": "PENDING", ... },
///   "payment_client_secret": "pi_..._secret_..."
/// }
/// ```
pub async fn create_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<CreateTransferRequest>,
) -> Result<(StatusCode, Json<CreateTransferResponse>), AppError> {
    let response =
        transfer_service::create(&state.pool, state.payments.as_ref(), auth.user_id, request)
            .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_transfer(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(transfer_id): AppPath<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(
        transfer_service::get_for_user(&pool, auth.user_id, transfer_id).await?,
    ))
}
