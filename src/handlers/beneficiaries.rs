//! Beneficiary HTTP handlers (client only).
//!
//! - GET /api/v1/beneficiaries - Active beneficiaries of the caller
//! - POST /api/v1/beneficiaries - Register a beneficiary
//! - GET /api/v1/beneficiaries/{id}
//! - PUT /api/v1/beneficiaries/{id} - Partial update
//! - DELETE /api/v1/beneficiaries/{id} - Soft delete, refused while an ACTIVE subscription pays them

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    extract::{AppJson, AppPath},
    middleware::auth::AuthContext,
    models::beneficiary::{Beneficiary, CreateBeneficiaryRequest, UpdateBeneficiaryRequest},
    services::beneficiary_service,
};

pub async fn list_beneficiaries(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Beneficiary>>, AppError> {
    Ok(Json(beneficiary_service::list(&pool, auth.user_id).await?))
}

/// `POST /api/v1/beneficiaries`
///
/// # Request Body
///
/// ```json
/// {
///   "full_name": "Voahirana Rasoa",
///   "phone": "+261 34 12 345 67",
///   "delivery_method": "MOBILE_MONEY",
///   "provider": "MVola",
///   "city": "Antananarivo",
///   "relationship": "Mother"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the beneficiary
/// - **400**: invalid phone number or missing provider/account for the delivery method
pub async fn create_beneficiary(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppJson(request): AppJson<CreateBeneficiaryRequest>,
) -> Result<(StatusCode, Json<Beneficiary>), AppError> {
    let beneficiary = beneficiary_service::create(&pool, auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(beneficiary)))
}

pub async fn get_beneficiary(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(beneficiary_id): AppPath<Uuid>,
) -> Result<Json<Beneficiary>, AppError> {
    Ok(Json(
        beneficiary_service::get(&pool, auth.user_id, beneficiary_id).await?,
    ))
}

pub async fn update_beneficiary(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(beneficiary_id): AppPath<Uuid>,
    AppJson(request): AppJson<UpdateBeneficiaryRequest>,
) -> Result<Json<Beneficiary>, AppError> {
    let beneficiary =
        beneficiary_service::update(&pool, auth.user_id, beneficiary_id, request).await?;
    Ok(Json(beneficiary))
}

/// `DELETE /api/v1/beneficiaries/{id}`
///
/// - **204 No Content**: deleted
/// - **400**: an ACTIVE subscription still pays this beneficiary
/// - **404**: unknown or foreign beneficiary
pub async fn delete_beneficiary(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(beneficiary_id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    beneficiary_service::delete(&pool, auth.user_id, beneficiary_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
