//! Client dashboard.

use axum::{Extension, Json, extract::State};

use crate::{
    db::DbPool, error::AppError, middleware::auth::AuthContext, models::report::ClientDashboard,
    services::report_service,
};

/// `GET /api/v1/dashboard`
pub async fn client_dashboard(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ClientDashboard>, AppError> {
    Ok(Json(report_service::client_dashboard(&pool, auth.user_id).await?))
}
