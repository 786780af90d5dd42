//! Beneficiary service - CRUD over a client's recipients.
//!
//! Every query filters on `user_id`, so a client can never read or modify
//! another client's beneficiaries; foreign ids answer 404.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::beneficiary::{Beneficiary, CreateBeneficiaryRequest, UpdateBeneficiaryRequest},
    validation::normalize_phone,
};

/// Active beneficiaries of `user_id`, alphabetical.
pub async fn list(pool: &DbPool, user_id: Uuid) -> Result<Vec<Beneficiary>, AppError> {
    let beneficiaries = sqlx::query_as::<_, Beneficiary>(
        "SELECT * FROM beneficiaries WHERE user_id = $1 AND is_active = TRUE ORDER BY full_name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(beneficiaries)
}

/// Fetch an active beneficiary owned by `user_id`.
pub async fn get(pool: &DbPool, user_id: Uuid, beneficiary_id: Uuid) -> Result<Beneficiary, AppError> {
    sqlx::query_as::<_, Beneficiary>(
        "SELECT * FROM beneficiaries WHERE id = $1 AND user_id = $2 AND is_active = TRUE",
    )
    .bind(beneficiary_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Beneficiary"))
}

pub(crate) const BENEFICIARY_GONE: &str = "Beneficiary is no longer active";

/// Share-lock an active beneficiary of `user_id` until the surrounding
/// transaction ends. A concurrent `delete` waits on this lock, and a
/// beneficiary deleted first is reported as gone.
pub(crate) async fn lock_active<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    beneficiary_id: Uuid,
) -> Result<(), AppError> {
    let found: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM beneficiaries WHERE id = $1 AND user_id = $2 AND is_active = TRUE FOR SHARE",
    )
    .bind(beneficiary_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(AppError::invalid(BENEFICIARY_GONE)),
    }
}

pub async fn create(
    pool: &DbPool,
    user_id: Uuid,
    request: CreateBeneficiaryRequest,
) -> Result<Beneficiary, AppError> {
    request.validate()?;

    let beneficiary = sqlx::query_as::<_, Beneficiary>(
        r#"
        INSERT INTO beneficiaries (
            user_id, full_name, phone, delivery_method, provider, account_number, city, relationship
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(request.full_name.trim())
    .bind(normalize_phone(&request.phone))
    .bind(request.delivery_method)
    .bind(trimmed(request.provider))
    .bind(trimmed(request.account_number))
    .bind(trimmed(request.city))
    .bind(trimmed(request.relationship))
    .fetch_one(pool)
    .await?;

    tracing::info!(%user_id, beneficiary_id = %beneficiary.id, "beneficiary created");
    Ok(beneficiary)
}

pub async fn update(
    pool: &DbPool,
    user_id: Uuid,
    beneficiary_id: Uuid,
    request: UpdateBeneficiaryRequest,
) -> Result<Beneficiary, AppError> {
    let current = get(pool, user_id, beneficiary_id).await?;
    request.validate_against(&current)?;

    let beneficiary = sqlx::query_as::<_, Beneficiary>(
        r#"
        UPDATE beneficiaries
        SET full_name = COALESCE($1, full_name),
            phone = COALESCE($2, phone),
            delivery_method = COALESCE($3, delivery_method),
            provider = COALESCE($4, provider),
            account_number = COALESCE($5, account_number),
            city = COALESCE($6, city),
            relationship = COALESCE($7, relationship),
            updated_at = NOW()
        WHERE id = $8 AND user_id = $9
        RETURNING *
        "#,
    )
    .bind(request.full_name.as_deref().map(str::trim))
    .bind(request.phone.as_deref().map(normalize_phone))
    .bind(request.delivery_method)
    .bind(trimmed(request.provider))
    .bind(trimmed(request.account_number))
    .bind(trimmed(request.city))
    .bind(trimmed(request.relationship))
    .bind(beneficiary_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(beneficiary)
}

/// Soft-delete a beneficiary.
///
/// # Errors
///
/// - `NotFound`: unknown, foreign or already deleted beneficiary
/// - `InvalidRequest`: an ACTIVE subscription still pays this beneficiary
pub async fn delete(pool: &DbPool, user_id: Uuid, beneficiary_id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    // Waits for subscription create/resume holding the share lock.
    let found: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM beneficiaries WHERE id = $1 AND user_id = $2 AND is_active = TRUE FOR UPDATE",
    )
    .bind(beneficiary_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if found.is_none() {
        return Err(AppError::NotFound("Beneficiary"));
    }

    let has_active_subscription: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE beneficiary_id = $1 AND status = 'ACTIVE')",
    )
    .bind(beneficiary_id)
    .fetch_one(&mut *tx)
    .await?;
    if has_active_subscription {
        return Err(AppError::invalid(
            "Cannot delete a beneficiary with an active subscription. Cancel or pause the subscription first.",
        ));
    }

    sqlx::query("UPDATE beneficiaries SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(beneficiary_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(%user_id, %beneficiary_id, "beneficiary deleted");
    Ok(())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_optional_fields_become_null() {
        assert_eq!(trimmed(Some("  ".into())), None);
        assert_eq!(trimmed(Some(" MVola ".into())), Some("MVola".into()));
        assert_eq!(trimmed(None), None);
    }

    #[sqlx::test]
    #[ignore = "requires Postgres"]
    async fn delete_waits_for_subscriptions_to_stop(pool: DbPool) {
        use crate::test_support::{insert_beneficiary, insert_client, insert_subscription};

        let user = insert_client(&pool, "hery@example.com").await;
        let beneficiary = insert_beneficiary(&pool, user).await;
        let today = chrono::Utc::now().date_naive();
        let subscription =
            insert_subscription(&pool, user, beneficiary, "ACTIVE", today, None).await;

        let err = delete(&pool, user, beneficiary).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)), "{err:?}");
        assert!(get(&pool, user, beneficiary).await.is_ok());

        sqlx::query("UPDATE subscriptions SET status = 'PAUSED' WHERE id = $1")
            .bind(subscription)
            .execute(&pool)
            .await
            .unwrap();
        delete(&pool, user, beneficiary).await.unwrap();

        assert!(matches!(
            get(&pool, user, beneficiary).await,
            Err(AppError::NotFound("Beneficiary"))
        ));
        assert!(matches!(
            delete(&pool, user, beneficiary).await,
            Err(AppError::NotFound("Beneficiary"))
        ));
    }

    #[sqlx::test]
    #[ignore = "requires Postgres"]
    async fn other_clients_cannot_delete(pool: DbPool) {
        use crate::test_support::{insert_beneficiary, insert_client};

        let owner = insert_client(&pool, "hery@example.com").await;
        let stranger = insert_client(&pool, "noro@example.com").await;
        let beneficiary = insert_beneficiary(&pool, owner).await;

        assert!(matches!(
            delete(&pool, stranger, beneficiary).await,
            Err(AppError::NotFound("Beneficiary"))
        ));
        assert!(lock_active(&pool, owner, beneficiary).await.is_ok());
        assert!(lock_active(&pool, stranger, beneficiary).await.is_err());
    }
}
