//! Subscription service - recurring transfers and their processor-side billing.
//!
//! The local row is the source of truth for the schedule; the processor
//! subscription only bills the client. When the processor is disabled the
//! `stripe_subscription_id` stays empty and transfers are settled by hand.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        notification::{NewNotification, NotificationType},
        settings::format_cad,
        subscription::{
            CreateSubscriptionRequest, Frequency, Subscription, SubscriptionStatus,
            UpdateSubscriptionRequest,
        },
        user::User,
    },
    services::{
        auth_service, beneficiary_service, notification_service,
        payments::{NewProcessorSubscription, PaymentProcessor},
        settings_service,
    },
};

pub async fn list(pool: &DbPool, user_id: Uuid) -> Result<Vec<Subscription>, AppError> {
    let subscriptions = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(subscriptions)
}

pub async fn get(pool: &DbPool, user_id: Uuid, subscription_id: Uuid) -> Result<Subscription, AppError> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1 AND user_id = $2")
        .bind(subscription_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Subscription"))
}

/// Processor customer id for `user`, created on first use.
///
/// Returns `None` when the processor is disabled.
pub async fn ensure_customer(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user: &User,
) -> Result<Option<String>, AppError> {
    if !payments.is_enabled() {
        return Ok(None);
    }
    if let Some(customer_id) = &user.stripe_customer_id {
        return Ok(Some(customer_id.clone()));
    }

    let customer_id = payments
        .create_customer(&user.email, &user.full_name(), user.id)
        .await?;
    sqlx::query("UPDATE users SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2")
        .bind(&customer_id)
        .bind(user.id)
        .execute(pool)
        .await?;

    tracing::info!(user_id = %user.id, "payment customer created");
    Ok(Some(customer_id))
}

struct NewSubscriptionRow<'a> {
    id: Uuid,
    user_id: Uuid,
    beneficiary_id: Uuid,
    amount_cad_cents: i64,
    frequency: Frequency,
    next_transfer_date: NaiveDate,
    processor_id: Option<&'a str>,
}

async fn insert_for_locked_beneficiary(
    pool: &DbPool,
    row: &NewSubscriptionRow<'_>,
) -> Result<Subscription, AppError> {
    let mut tx = pool.begin().await?;
    beneficiary_service::lock_active(&mut *tx, row.user_id, row.beneficiary_id).await?;

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (
            id, user_id, beneficiary_id, amount_cad_cents, frequency, next_transfer_date,
            stripe_subscription_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(row.id)
    .bind(row.user_id)
    .bind(row.beneficiary_id)
    .bind(row.amount_cad_cents)
    .bind(row.frequency)
    .bind(row.next_transfer_date)
    .bind(row.processor_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(subscription)
}

/// Cancel a processor subscription that no local row points at.
async fn discard_processor_subscription(
    payments: &dyn PaymentProcessor,
    processor_id: &str,
    subscription_id: Uuid,
) {
    match payments.cancel_subscription(processor_id).await {
        Ok(()) => tracing::warn!(%subscription_id, processor_id, "processor subscription discarded"),
        Err(e) => tracing::error!(
            %subscription_id,
            processor_id,
            "failed to cancel orphaned processor subscription: {e}"
        ),
    }
}

/// Unix timestamp of the first charge, if it lies after today.
fn first_charge_at(start: NaiveDate, today: NaiveDate) -> Option<i64> {
    if start > today {
        start.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp())
    } else {
        None
    }
}

/// Create a subscription and its processor-side billing.
///
/// The processor subscription is created first, outside any transaction.
/// The row is then inserted while the beneficiary is share-locked; if that
/// fails the processor subscription is cancelled again.
pub async fn create(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    request: CreateSubscriptionRequest,
) -> Result<Subscription, AppError> {
    let today = Utc::now().date_naive();
    request.validate(today)?;

    let beneficiary = beneficiary_service::get(pool, user_id, request.beneficiary_id).await?;
    let quote = settings_service::quote(pool, request.amount_cad_cents).await?;
    let start = request.start_date.unwrap_or(today);
    let subscription_id = Uuid::new_v4();

    let user = auth_service::find_user(pool, user_id).await?;
    let processor_id = match ensure_customer(pool, payments, &user).await? {
        Some(customer_id) => Some(
            payments
                .create_subscription(&NewProcessorSubscription {
                    customer_id: &customer_id,
                    amount_cents: quote.total_cad_cents,
                    frequency: request.frequency,
                    subscription_id,
                    first_charge_at: first_charge_at(start, today),
                })
                .await?,
        ),
        None => None,
    };

    let new_row = NewSubscriptionRow {
        id: subscription_id,
        user_id,
        beneficiary_id: beneficiary.id,
        amount_cad_cents: request.amount_cad_cents,
        frequency: request.frequency,
        next_transfer_date: start,
        processor_id: processor_id.as_deref(),
    };
    let subscription = match insert_for_locked_beneficiary(pool, &new_row).await {
        Ok(subscription) => subscription,
        Err(err) => {
            if let Some(processor_id) = processor_id.as_deref() {
                discard_processor_subscription(payments, processor_id, subscription_id).await;
            }
            return Err(err);
        }
    };

    tracing::info!(
        %user_id,
        subscription_id = %subscription.id,
        frequency = ?subscription.frequency,
        "subscription created"
    );
    notification_service::notify(
        pool,
        user_id,
        NewNotification::new(
            NotificationType::SubscriptionCreated,
            "Subscription created",
            format!(
                "Your {} subscription of {} CAD to {} starts on {}.",
                frequency_label(subscription.frequency),
                format_cad(subscription.amount_cad_cents),
                beneficiary.full_name,
                subscription.next_transfer_date
            ),
        ),
    )
    .await;

    Ok(subscription)
}

/// Change amount and/or frequency.
///
/// The processor cannot change a price in place, so the current processor
/// subscription is replaced. The new one is created (and paused, for a
/// paused subscription) first; the old one is cancelled only after the row
/// points at the new one. Any failure before that cancels the new one.
pub async fn update(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    subscription_id: Uuid,
    request: UpdateSubscriptionRequest,
) -> Result<Subscription, AppError> {
    request.validate()?;
    let current = get(pool, user_id, subscription_id).await?;
    if current.status == SubscriptionStatus::Cancelled {
        return Err(AppError::invalid("Cannot update a CANCELLED subscription"));
    }

    let amount = request.amount_cad_cents.unwrap_or(current.amount_cad_cents);
    let frequency = request.frequency.unwrap_or(current.frequency);
    let quote = settings_service::quote(pool, amount).await?;

    // (old, new) processor ids once a replacement exists
    let mut replacement: Option<(String, String)> = None;
    if let Some(old_id) = current.stripe_subscription_id.as_deref() {
        let user = auth_service::find_user(pool, user_id).await?;
        if let Some(customer_id) = ensure_customer(pool, payments, &user).await? {
            let today = Utc::now().date_naive();
            let new_id = payments
                .create_subscription(&NewProcessorSubscription {
                    customer_id: &customer_id,
                    amount_cents: quote.total_cad_cents,
                    frequency,
                    subscription_id: current.id,
                    first_charge_at: first_charge_at(current.next_transfer_date, today),
                })
                .await?;
            if current.status == SubscriptionStatus::Paused {
                if let Err(e) = payments.pause_subscription(&new_id).await {
                    discard_processor_subscription(payments, &new_id, subscription_id).await;
                    return Err(e.into());
                }
            }
            replacement = Some((old_id.to_string(), new_id));
        }
    }

    let processor_id = match &replacement {
        Some((_, new_id)) => Some(new_id.clone()),
        None => current.stripe_subscription_id.clone(),
    };
    let updated = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET amount_cad_cents = $1, frequency = $2, stripe_subscription_id = $3, updated_at = NOW()
        WHERE id = $4 AND user_id = $5
        RETURNING *
        "#,
    )
    .bind(amount)
    .bind(frequency)
    .bind(processor_id)
    .bind(subscription_id)
    .bind(user_id)
    .fetch_one(pool)
    .await;

    let subscription = match (updated, &replacement) {
        (Ok(subscription), _) => subscription,
        (Err(err), Some((_, new_id))) => {
            discard_processor_subscription(payments, new_id, subscription_id).await;
            return Err(err.into());
        }
        (Err(err), None) => return Err(err.into()),
    };
    if let Some((old_id, _)) = &replacement {
        if let Err(e) = payments.cancel_subscription(old_id).await {
            tracing::error!(%subscription_id, %old_id, "failed to cancel replaced processor subscription: {e}");
        }
    }

    tracing::info!(%user_id, %subscription_id, "subscription updated");
    notification_service::notify(
        pool,
        user_id,
        NewNotification::new(
            NotificationType::SubscriptionUpdated,
            "Subscription updated",
            format!(
                "Your subscription is now {} {} CAD.",
                frequency_label(subscription.frequency),
                format_cad(subscription.amount_cad_cents)
            ),
        ),
    )
    .await;

    Ok(subscription)
}

pub async fn pause(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    subscription_id: Uuid,
) -> Result<Subscription, AppError> {
    change_status(pool, payments, user_id, subscription_id, SubscriptionStatus::Paused).await
}

pub async fn resume(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    subscription_id: Uuid,
) -> Result<Subscription, AppError> {
    change_status(pool, payments, user_id, subscription_id, SubscriptionStatus::Active).await
}

pub async fn cancel(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    subscription_id: Uuid,
) -> Result<Subscription, AppError> {
    change_status(pool, payments, user_id, subscription_id, SubscriptionStatus::Cancelled).await
}

async fn change_status(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    subscription_id: Uuid,
    next: SubscriptionStatus,
) -> Result<Subscription, AppError> {
    let current = get(pool, user_id, subscription_id).await?;
    current.status.ensure_transition(next)?;

    let resuming = next == SubscriptionStatus::Active;
    if resuming {
        beneficiary_service::lock_active(pool, user_id, current.beneficiary_id).await?;
    }

    let processor_id = current
        .stripe_subscription_id
        .as_deref()
        .filter(|_| payments.is_enabled());
    if let Some(processor_id) = processor_id {
        match next {
            SubscriptionStatus::Paused => payments.pause_subscription(processor_id).await?,
            SubscriptionStatus::Active => payments.resume_subscription(processor_id).await?,
            SubscriptionStatus::Cancelled => payments.cancel_subscription(processor_id).await?,
        }
    }

    // A resumed subscription never back-fills the periods it skipped.
    let today = Utc::now().date_naive();
    let next_date = if resuming && current.next_transfer_date < today {
        today
    } else {
        current.next_transfer_date
    };

    let subscription = match write_status(pool, &current, next, next_date).await {
        Ok(subscription) => subscription,
        Err(err) => {
            if let (true, Some(processor_id)) = (resuming, processor_id) {
                if let Err(e) = payments.pause_subscription(processor_id).await {
                    tracing::error!(%subscription_id, processor_id, "failed to re-pause processor subscription: {e}");
                }
            }
            return Err(err);
        }
    };

    tracing::info!(%user_id, %subscription_id, status = next.as_str(), "subscription status changed");
    notification_service::notify(
        pool,
        user_id,
        NewNotification::new(
            NotificationType::SubscriptionUpdated,
            status_title(next),
            format!(
                "Your subscription of {} CAD is now {}.",
                format_cad(subscription.amount_cad_cents),
                next.as_str()
            ),
        ),
    )
    .await;

    Ok(subscription)
}

/// Persist a status change. Resuming re-checks the beneficiary under a share
/// lock so a concurrent delete cannot slip in between.
async fn write_status(
    pool: &DbPool,
    current: &Subscription,
    next: SubscriptionStatus,
    next_date: NaiveDate,
) -> Result<Subscription, AppError> {
    let mut tx = pool.begin().await?;
    if next == SubscriptionStatus::Active {
        beneficiary_service::lock_active(&mut *tx, current.user_id, current.beneficiary_id).await?;
    }

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = $1,
            next_transfer_date = $2,
            cancelled_at = CASE WHEN $1 = 'CANCELLED'::subscription_status THEN NOW() ELSE cancelled_at END,
            updated_at = NOW()
        WHERE id = $3 AND user_id = $4
        RETURNING *
        "#,
    )
    .bind(next)
    .bind(next_date)
    .bind(current.id)
    .bind(current.user_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(subscription)
}

/// Mark a subscription cancelled after the processor ended it on its side.
pub async fn cancel_by_processor_id(pool: &DbPool, processor_id: &str) -> Result<Option<Subscription>, AppError> {
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = 'CANCELLED', cancelled_at = NOW(), updated_at = NOW()
        WHERE stripe_subscription_id = $1 AND status <> 'CANCELLED'
        RETURNING *
        "#,
    )
    .bind(processor_id)
    .fetch_optional(pool)
    .await?;

    if let Some(subscription) = &subscription {
        notification_service::notify(
            pool,
            subscription.user_id,
            NewNotification::new(
                NotificationType::SubscriptionUpdated,
                "Subscription cancelled",
                format!(
                    "Your subscription of {} CAD was cancelled by the payment provider.",
                    format_cad(subscription.amount_cad_cents)
                ),
            ),
        )
        .await;
    }
    Ok(subscription)
}

fn frequency_label(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Weekly => "weekly",
        Frequency::Biweekly => "biweekly",
        Frequency::Monthly => "monthly",
    }
}

fn status_title(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Active => "Subscription resumed",
        SubscriptionStatus::Paused => "Subscription paused",
        SubscriptionStatus::Cancelled => "Subscription cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn first_charge_only_for_future_starts() {
        let today = date(2026, 10, 17);
        assert_eq!(first_charge_at(today, today), None);
        assert_eq!(
            first_charge_at(date(2026, 11, 1), today),
            Some(1_793_491_200)
        );
    }

    #[test]
    fn labels() {
        assert_eq!(frequency_label(Frequency::Biweekly), "biweekly");
        assert_eq!(status_title(SubscriptionStatus::Paused), "Subscription paused");
    }

    mod with_database {
        use super::*;
        use crate::{
            services::payments::DisabledProcessor,
            test_support::{RecordingProcessor, insert_beneficiary, insert_client, insert_subscription},
        };

        #[sqlx::test]
        #[ignore = "requires Postgres"]
        async fn resume_is_refused_once_the_beneficiary_is_deleted(pool: DbPool) {
            let user = insert_client(&pool, "hery@example.com").await;
            let beneficiary = insert_beneficiary(&pool, user).await;
            let today = Utc::now().date_naive();
            let subscription =
                insert_subscription(&pool, user, beneficiary, "ACTIVE", today, None).await;

            pause(&pool, &DisabledProcessor, user, subscription).await.unwrap();
            beneficiary_service::delete(&pool, user, beneficiary).await.unwrap();

            let err = resume(&pool, &DisabledProcessor, user, subscription)
                .await
                .unwrap_err();
            assert!(
                matches!(err, AppError::InvalidRequest(ref m) if m == "Beneficiary is no longer active"),
                "{err:?}"
            );
            let stored = get(&pool, user, subscription).await.unwrap();
            assert_eq!(stored.status, SubscriptionStatus::Paused);
        }

        #[sqlx::test]
        #[ignore = "requires Postgres"]
        async fn refused_resume_never_reaches_the_processor(pool: DbPool) {
            let user = insert_client(&pool, "hery@example.com").await;
            let beneficiary = insert_beneficiary(&pool, user).await;
            let today = Utc::now().date_naive();
            let subscription =
                insert_subscription(&pool, user, beneficiary, "PAUSED", today, Some("sub_live")).await;
            beneficiary_service::delete(&pool, user, beneficiary).await.unwrap();

            let processor = RecordingProcessor::default();
            let err = resume(&pool, &processor, user, subscription).await.unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
            assert!(processor.calls().is_empty());
        }

        #[sqlx::test]
        #[ignore = "requires Postgres"]
        async fn create_stores_the_processor_subscription(pool: DbPool) {
            let user = insert_client(&pool, "hery@example.com").await;
            let beneficiary = insert_beneficiary(&pool, user).await;
            let processor = RecordingProcessor::default();

            let subscription = create(
                &pool,
                &processor,
                user,
                CreateSubscriptionRequest {
                    beneficiary_id: beneficiary,
                    amount_cad_cents: 10_000,
                    frequency: Frequency::Monthly,
                    start_date: None,
                },
            )
            .await
            .unwrap();

            assert_eq!(subscription.status, SubscriptionStatus::Active);
            assert_eq!(subscription.stripe_subscription_id.as_deref(), Some("sub_2"));
            assert_eq!(
                processor.calls(),
                vec![format!("create_customer:{user}"), "create_subscription:sub_2".to_string()]
            );
        }

        #[sqlx::test]
        #[ignore = "requires Postgres"]
        async fn failed_pause_of_the_replacement_cancels_it(pool: DbPool) {
            let user = insert_client(&pool, "hery@example.com").await;
            sqlx::query("UPDATE users SET stripe_customer_id = 'cus_existing' WHERE id = $1")
                .bind(user)
                .execute(&pool)
                .await
                .unwrap();
            let beneficiary = insert_beneficiary(&pool, user).await;
            let today = Utc::now().date_naive();
            let subscription =
                insert_subscription(&pool, user, beneficiary, "PAUSED", today, Some("sub_old")).await;

            let processor = RecordingProcessor::failing_pause();
            let err = update(
                &pool,
                &processor,
                user,
                subscription,
                UpdateSubscriptionRequest {
                    amount_cad_cents: Some(20_000),
                    frequency: None,
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::Payment(_)), "{err:?}");

            assert_eq!(
                processor.calls(),
                vec!["create_subscription:sub_1", "pause:sub_1", "cancel:sub_1"]
            );
            let stored = get(&pool, user, subscription).await.unwrap();
            assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_old"));
            assert_eq!(stored.amount_cad_cents, 10_000);
        }

        #[sqlx::test]
        #[ignore = "requires Postgres"]
        async fn update_cancels_the_old_processor_subscription_last(pool: DbPool) {
            let user = insert_client(&pool, "hery@example.com").await;
            sqlx::query("UPDATE users SET stripe_customer_id = 'cus_existing' WHERE id = $1")
                .bind(user)
                .execute(&pool)
                .await
                .unwrap();
            let beneficiary = insert_beneficiary(&pool, user).await;
            let today = Utc::now().date_naive();
            let subscription =
                insert_subscription(&pool, user, beneficiary, "ACTIVE", today, Some("sub_old")).await;

            let processor = RecordingProcessor::default();
            let updated = update(
                &pool,
                &processor,
                user,
                subscription,
                UpdateSubscriptionRequest {
                    amount_cad_cents: None,
                    frequency: Some(Frequency::Weekly),
                },
            )
            .await
            .unwrap();

            assert_eq!(updated.frequency, Frequency::Weekly);
            assert_eq!(updated.stripe_subscription_id.as_deref(), Some("sub_1"));
            assert_eq!(processor.calls(), vec!["create_subscription:sub_1", "cancel:sub_old"]);
        }
    }
}
