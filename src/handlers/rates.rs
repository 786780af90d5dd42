//! Exchange rate and quote endpoints (any authenticated user).

use axum::{Json, extract::State};

use crate::{
    db::DbPool,
    error::AppError,
    extract::AppQuery,
    models::settings::{ExchangeRate, Quote, QuoteParams},
    services::settings_service,
};

/// `GET /api/v1/exchange-rate`
pub async fn current_rate(State(pool): State<DbPool>) -> Result<Json<ExchangeRate>, AppError> {
    Ok(Json(settings_service::current_rate(&pool).await?))
}

/// `GET /api/v1/quote?amount_cad_cents=15000`
///
/// # Response
///
/// ```json
/// {
///   "amount_cad_cents": 15000,
///   "fee_cad_cents": 674,
///   "total_cad_cents": 15674,
///   "amount_mga": 495000,
///   "exchange_rate": "3300.000000"
/// }
/// ```
pub async fn quote(
    State(pool): State<DbPool>,
    AppQuery(params): AppQuery<QuoteParams>,
) -> Result<Json<Quote>, AppError> {
    Ok(Json(
        settings_service::quote(&pool, params.amount_cad_cents).await?,
    ))
}
