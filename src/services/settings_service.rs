//! Settings service - system settings, exchange rates and quotes.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        pagination::{Page, PageParams},
        settings::{
            ExchangeRate, FeeSchedule, KNOWN_KEYS, Quote, SetExchangeRateRequest, SystemSetting,
        },
    },
};

pub async fn list_settings(pool: &DbPool) -> Result<Vec<SystemSetting>, AppError> {
    let settings = sqlx::query_as::<_, SystemSetting>("SELECT * FROM system_settings ORDER BY key")
        .fetch_all(pool)
        .await?;
    Ok(settings)
}

async fn settings_map(pool: &DbPool) -> Result<HashMap<String, String>, AppError> {
    Ok(list_settings(pool)
        .await?
        .into_iter()
        .map(|s| (s.key, s.value))
        .collect())
}

/// Current pricing. Stored values were validated on write; if the table was
/// edited by hand into an invalid state the defaults apply.
pub async fn fee_schedule(pool: &DbPool) -> Result<FeeSchedule, AppError> {
    let values = settings_map(pool).await?;
    Ok(FeeSchedule::from_map(&values).unwrap_or_else(|e| {
        tracing::error!("invalid pricing settings ({e}), falling back to defaults");
        FeeSchedule::default()
    }))
}

/// Apply a batch of setting changes atomically.
///
/// Unknown keys are rejected, and the merged pricing must still be
/// consistent (e.g. max >= min) before anything is written.
pub async fn update_settings(
    pool: &DbPool,
    admin_id: Uuid,
    changes: HashMap<String, String>,
) -> Result<Vec<SystemSetting>, AppError> {
    if changes.is_empty() {
        return Err(AppError::invalid("No settings to update"));
    }
    if let Some(unknown) = changes.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
        return Err(AppError::invalid(format!("Unknown setting: {unknown}")));
    }

    let mut merged = settings_map(pool).await?;
    merged.extend(changes.iter().map(|(k, v)| (k.clone(), v.trim().to_string())));
    FeeSchedule::from_map(&merged)?;

    let mut tx = pool.begin().await?;
    for (key, value) in &changes {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_by, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_by = EXCLUDED.updated_by,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value.trim())
        .bind(admin_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(%admin_id, keys = ?changes.keys().collect::<Vec<_>>(), "settings updated");
    list_settings(pool).await
}

/// Latest exchange rate; the newest row wins.
pub async fn current_rate(pool: &DbPool) -> Result<ExchangeRate, AppError> {
    sqlx::query_as::<_, ExchangeRate>(
        "SELECT * FROM exchange_rates ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Exchange rate"))
}

pub async fn rate_history(pool: &DbPool, page: PageParams) -> Result<Page<ExchangeRate>, AppError> {
    let items = sqlx::query_as::<_, ExchangeRate>(
        "SELECT * FROM exchange_rates ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exchange_rates")
        .fetch_one(pool)
        .await?;

    Ok(Page::new(items, page, total))
}

pub async fn set_rate(
    pool: &DbPool,
    admin_id: Uuid,
    request: SetExchangeRateRequest,
) -> Result<ExchangeRate, AppError> {
    request.validate()?;

    let rate = sqlx::query_as::<_, ExchangeRate>(
        r#"
        INSERT INTO exchange_rates (rate, source, created_by)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(request.rate)
    .bind(request.source.as_deref().unwrap_or("manual"))
    .bind(admin_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(%admin_id, rate = %rate.rate, "exchange rate updated");
    Ok(rate)
}

/// Price `amount_cad_cents` with the current settings and rate.
pub async fn quote(pool: &DbPool, amount_cad_cents: i64) -> Result<Quote, AppError> {
    let schedule = fee_schedule(pool).await?;
    let rate = current_rate(pool).await?;
    Ok(schedule.quote(amount_cad_cents, rate.rate)?)
}
