//! Webhook service - applies verified payment processor events.
//!
//! Signature checks happen in the handler; everything here assumes the
//! event is authentic. Events are applied idempotently: a redelivered
//! event finds nothing left to change and is acknowledged again.
//!
//! The processor may bill a period before the scheduler has created its
//! transfer. Such invoice events are stored in `deferred_invoice_events`
//! and applied by the scheduler to the next transfer of the subscription.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{notification::NotificationType, transfer::Transfer},
    services::{payments::webhook::StripeEvent, subscription_service, transfer_service},
};

const INVOICE_PAID: &str = "invoice.paid";
const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

/// Deferred events older than this are dropped by the scheduler.
pub const DEFERRED_EVENT_RETENTION_DAYS: i32 = 30;

/// What an event did, reported in logs and in the acknowledgement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Applied,
    /// Stored until the scheduler creates the transfer it belongs to
    Deferred,
    /// Recognised, but nothing matched (already applied, unknown ids...)
    NoMatch,
    Ignored,
}

/// Dispatch a verified event.
///
/// # Handled Events
///
/// - `invoice.paid`: attach the invoice to the newest PENDING transfer of
///   the subscription that has none yet
/// - `invoice.payment_failed`: newest PENDING transfer of the subscription
///   becomes FAILED and keeps the invoice id
///
/// Both invoice events are deferred when the subscription is known but has
/// no transfer waiting for this invoice yet.
/// - `payment_intent.payment_failed`: the one-time transfer becomes FAILED
/// - `customer.subscription.deleted`: the subscription becomes CANCELLED
///
/// Any other type is acknowledged and ignored.
pub async fn handle_event(pool: &DbPool, event: &StripeEvent) -> Result<EventOutcome, AppError> {
    let outcome = match event.event_type.as_str() {
        INVOICE_PAID => invoice_paid(pool, event).await?,
        INVOICE_PAYMENT_FAILED => invoice_payment_failed(pool, event).await?,
        "payment_intent.payment_failed" => payment_intent_failed(pool, event).await?,
        "customer.subscription.deleted" => subscription_deleted(pool, event).await?,
        _ => EventOutcome::Ignored,
    };

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        ?outcome,
        "payment webhook processed"
    );
    Ok(outcome)
}

async fn invoice_paid(pool: &DbPool, event: &StripeEvent) -> Result<EventOutcome, AppError> {
    let (Some(invoice_id), Some(processor_subscription)) =
        (event.object_str("id"), event.object_str("subscription"))
    else {
        return Ok(EventOutcome::NoMatch);
    };

    let result = sqlx::query(
        r#"
        UPDATE transfers
        SET stripe_invoice_id = $1, updated_at = NOW()
        WHERE id = (
            SELECT t.id
            FROM transfers t
            JOIN subscriptions s ON s.id = t.subscription_id
            WHERE s.stripe_subscription_id = $2
              AND t.status = 'PENDING'
              AND t.stripe_invoice_id IS NULL
            ORDER BY t.created_at DESC
            LIMIT 1
        )
        AND NOT EXISTS (SELECT 1 FROM transfers WHERE stripe_invoice_id = $1)
        "#,
    )
    .bind(invoice_id)
    .bind(processor_subscription)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(EventOutcome::Applied);
    }
    defer_if_early(pool, event, processor_subscription, invoice_id, None).await
}

async fn invoice_payment_failed(pool: &DbPool, event: &StripeEvent) -> Result<EventOutcome, AppError> {
    let (Some(invoice_id), Some(processor_subscription)) =
        (event.object_str("id"), event.object_str("subscription"))
    else {
        return Ok(EventOutcome::NoMatch);
    };
    let reason = event
        .failure_message()
        .unwrap_or_else(|| "Subscription payment failed".to_string());

    let failed = sqlx::query_as::<_, Transfer>(
        r#"
        UPDATE transfers
        SET status = 'FAILED', failure_reason = $1, stripe_invoice_id = $2, updated_at = NOW()
        WHERE id = (
            SELECT t.id
            FROM transfers t
            JOIN subscriptions s ON s.id = t.subscription_id
            WHERE s.stripe_subscription_id = $3
              AND t.status = 'PENDING'
              AND (t.stripe_invoice_id IS NULL OR t.stripe_invoice_id = $2)
            ORDER BY t.created_at DESC
            LIMIT 1
        )
        AND NOT EXISTS (
            SELECT 1 FROM transfers WHERE stripe_invoice_id = $2 AND status <> 'PENDING'
        )
        RETURNING *
        "#,
    )
    .bind(&reason)
    .bind(invoice_id)
    .bind(processor_subscription)
    .fetch_optional(pool)
    .await?;

    match failed {
        Some(transfer) => {
            tracing::warn!(transfer_id = %transfer.id, %reason, "transfer failed on payment");
            transfer_service::notify_failed(pool, &transfer, NotificationType::PaymentFailed).await;
            Ok(EventOutcome::Applied)
        }
        None => {
            defer_if_early(pool, event, processor_subscription, invoice_id, Some(reason.as_str()))
                .await
        }
    }
}

/// Store an invoice event whose transfer does not exist yet.
///
/// Nothing is stored when the subscription is unknown here or the invoice
/// is already attached to a transfer (a redelivery).
async fn defer_if_early(
    pool: &DbPool,
    event: &StripeEvent,
    processor_subscription: &str,
    invoice_id: &str,
    failure_reason: Option<&str>,
) -> Result<EventOutcome, AppError> {
    let deferred = sqlx::query(
        r#"
        INSERT INTO deferred_invoice_events (
            event_id, event_type, stripe_subscription_id, stripe_invoice_id, failure_reason
        )
        SELECT $1, $2, $3, $4, $5
        WHERE EXISTS (SELECT 1 FROM subscriptions WHERE stripe_subscription_id = $3)
          AND NOT EXISTS (SELECT 1 FROM transfers WHERE stripe_invoice_id = $4)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(&event.id)
    .bind(&event.event_type)
    .bind(processor_subscription)
    .bind(invoice_id)
    .bind(failure_reason)
    .execute(pool)
    .await?;

    if deferred.rows_affected() > 0 {
        tracing::info!(
            event_id = %event.id,
            processor_subscription,
            invoice_id,
            "invoice event deferred until its transfer exists"
        );
        return Ok(EventOutcome::Deferred);
    }

    // A redelivery of an event that is already waiting stays deferred.
    let waiting: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM deferred_invoice_events WHERE event_id = $1)")
            .bind(&event.id)
            .fetch_one(pool)
            .await?;
    Ok(if waiting {
        EventOutcome::Deferred
    } else {
        EventOutcome::NoMatch
    })
}

#[derive(Debug, sqlx::FromRow)]
struct DeferredInvoiceEvent {
    event_id: String,
    event_type: String,
    stripe_invoice_id: String,
    failure_reason: Option<String>,
}

/// Apply the oldest deferred invoice event of `processor_subscription` to a
/// transfer just created for it, inside the caller's transaction.
///
/// Returns the transfer as it stands afterwards.
pub(crate) async fn apply_deferred(
    conn: &mut PgConnection,
    processor_subscription: &str,
    transfer: Transfer,
) -> Result<Transfer, AppError> {
    let deferred = sqlx::query_as::<_, DeferredInvoiceEvent>(
        r#"
        DELETE FROM deferred_invoice_events
        WHERE event_id = (
            SELECT event_id FROM deferred_invoice_events
            WHERE stripe_subscription_id = $1
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING event_id, event_type, stripe_invoice_id, failure_reason
        "#,
    )
    .bind(processor_subscription)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(deferred) = deferred else {
        return Ok(transfer);
    };

    let updated = if deferred.event_type == INVOICE_PAYMENT_FAILED {
        let reason = deferred
            .failure_reason
            .as_deref()
            .unwrap_or("Subscription payment failed");
        sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET status = 'FAILED', failure_reason = $1, stripe_invoice_id = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(reason)
        .bind(&deferred.stripe_invoice_id)
        .bind(transfer.id)
        .fetch_one(&mut *conn)
        .await?
    } else {
        sqlx::query_as::<_, Transfer>(
            "UPDATE transfers SET stripe_invoice_id = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(&deferred.stripe_invoice_id)
        .bind(transfer.id)
        .fetch_one(&mut *conn)
        .await?
    };

    tracing::info!(
        event_id = %deferred.event_id,
        event_type = %deferred.event_type,
        transfer_id = %updated.id,
        "deferred invoice event applied"
    );
    Ok(updated)
}

/// Drop deferred events that never found their transfer.
pub async fn purge_stale_deferred(pool: &DbPool) -> Result<u64, AppError> {
    let result = sqlx::query(
        "DELETE FROM deferred_invoice_events WHERE created_at < NOW() - make_interval(days => $1)",
    )
    .bind(DEFERRED_EVENT_RETENTION_DAYS)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

async fn payment_intent_failed(pool: &DbPool, event: &StripeEvent) -> Result<EventOutcome, AppError> {
    let by_metadata = event
        .metadata("transfer_id")
        .and_then(|id| Uuid::parse_str(id).ok());

    let transfer_id = match (by_metadata, event.object_str("id")) {
        (Some(id), _) => Some(id),
        (None, Some(intent_id)) => {
            sqlx::query_scalar("SELECT id FROM transfers WHERE stripe_payment_intent_id = $1")
                .bind(intent_id)
                .fetch_optional(pool)
                .await?
        }
        (None, None) => None,
    };

    let Some(transfer_id) = transfer_id else {
        return Ok(EventOutcome::NoMatch);
    };
    let reason = event
        .failure_message()
        .unwrap_or_else(|| "Card payment failed".to_string());
    fail_transfer(pool, transfer_id, &reason).await
}

async fn fail_transfer(pool: &DbPool, transfer_id: Uuid, reason: &str) -> Result<EventOutcome, AppError> {
    let failed: Option<Transfer> = transfer_service::mark_failed(pool, transfer_id, reason).await?;
    match failed {
        Some(transfer) => {
            tracing::warn!(%transfer_id, reason, "transfer failed on payment");
            transfer_service::notify_failed(pool, &transfer, NotificationType::PaymentFailed).await;
            Ok(EventOutcome::Applied)
        }
        None => Ok(EventOutcome::NoMatch),
    }
}

async fn subscription_deleted(pool: &DbPool, event: &StripeEvent) -> Result<EventOutcome, AppError> {
    let Some(processor_id) = event.object_str("id") else {
        return Ok(EventOutcome::NoMatch);
    };
    let cancelled = subscription_service::cancel_by_processor_id(pool, processor_id).await?;
    Ok(applied_if(cancelled.is_some()))
}

fn applied_if(changed: bool) -> EventOutcome {
    if changed {
        EventOutcome::Applied
    } else {
        EventOutcome::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, db::create_lazy_pool};

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_test",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_events_are_ignored_without_touching_the_database() {
        let pool = create_lazy_pool(&Config::for_tests().database_url).unwrap();
        let outcome = handle_event(&pool, &event("charge.refunded", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn events_without_ids_do_not_match() {
        let pool = create_lazy_pool(&Config::for_tests().database_url).unwrap();
        for kind in [
            "invoice.paid",
            "invoice.payment_failed",
            "payment_intent.payment_failed",
            "customer.subscription.deleted",
        ] {
            let outcome = handle_event(&pool, &event(kind, serde_json::json!({})))
                .await
                .unwrap();
            assert_eq!(outcome, EventOutcome::NoMatch, "{kind}");
        }
    }
}
