//! Madagascar team HTTP handlers.
//!
//! The payout team works the PENDING queue oldest first, confirms
//! deliveries and reports failed ones. Admins can use these routes too.
//!
//! - GET /api/v1/team/dashboard
//! - GET /api/v1/team/transfers - Defaults to PENDING, oldest first
//! - POST /api/v1/team/transfers/{id}/confirm
//! - POST /api/v1/team/transfers/{id}/fail

use axum::{Extension, Json, extract::State};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    middleware::auth::AuthContext,
    models::{
        pagination::{Page, PageParams},
        report::TeamDashboard,
        transfer::{
            ConfirmTransferRequest, FailTransferRequest, Transfer, TransferDetails,
            TransferFilter, TransferStatus,
        },
    },
    services::{
        report_service,
        transfer_service::{self, SortOrder},
    },
};

pub async fn team_dashboard(State(pool): State<DbPool>) -> Result<Json<TeamDashboard>, AppError> {
    Ok(Json(report_service::team_dashboard(&pool).await?))
}

pub async fn list_transfers(
    State(pool): State<DbPool>,
    AppQuery(mut filter): AppQuery<TransferFilter>,
    AppQuery(page): AppQuery<PageParams>,
) -> Result<Json<Page<TransferDetails>>, AppError> {
    filter.status.get_or_insert(TransferStatus::Pending);
    let transfers =
        transfer_service::list_details(&pool, &filter, page, SortOrder::OldestFirst).await?;
    Ok(Json(transfers))
}

/// `POST /api/v1/team/transfers/{id}/confirm`
///
/// # Request Body (optional)
///
/// ```json
/// { "note": "Paid out via MVola, receipt 88231" }
/// ```
///
/// - **200 OK**: the COMPLETED transfer
/// - **400**: transfer is not PENDING
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

/// `POST /api/v1/team/transfers/{id}/fail`
///
/// ```json
/// { "reason": "Beneficiary phone unreachable for 3 days" }
/// ```
pub async fn fail_transfer(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(transfer_id): AppPath<Uuid>,
    AppJson(request): AppJson<FailTransferRequest>,
) -> Result<Json<Transfer>, AppError> {
    let transfer = transfer_service::fail(&pool, transfer_id, auth.user_id, request).await?;
    Ok(Json(transfer))
}
