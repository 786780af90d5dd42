//! Transfer service - creation, listings and the status lifecycle.
//!
//! This service handles:
//! - Pricing a transfer and freezing the quote onto the row
//! - Client, team and admin listings
//! - Confirm / fail / retry transitions
//!
//! # Status Guards
//!
//! Every transition is a conditional `UPDATE ... WHERE status = <expected>`,
//! so two operators acting on the same transfer cannot both win.

use chrono::Utc;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        notification::{NewNotification, NotificationType},
        pagination::{Page, PageParams},
        settings::{Quote, format_cad},
        subscription::Subscription,
        transfer::{
            ConfirmTransferRequest, CreateTransferRequest, CreateTransferResponse,
            FailTransferRequest, RetryPlan, Transfer, TransferDetails, TransferFilter,
            TransferStatus, generate_reference,
        },
        user::Role,
    },
    services::{
        beneficiary_service, notification_service,
        payments::{NewPaymentIntent, PaymentProcessor},
        settings_service, subscription_service,
    },
};

const DETAILS_SELECT: &str = r#"
    SELECT t.*,
           b.full_name AS beneficiary_name,
           b.phone AS beneficiary_phone,
           b.delivery_method,
           b.provider,
           b.account_number,
           u.first_name || ' ' || u.last_name AS client_name,
           u.email AS client_email
    FROM transfers t
    JOIN beneficiaries b ON b.id = t.beneficiary_id
    JOIN users u ON u.id = t.user_id
    WHERE 1 = 1
"#;

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    NewestFirst,
    /// Payout queue order
    OldestFirst,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::NewestFirst => " ORDER BY t.created_at DESC",
            SortOrder::OldestFirst => " ORDER BY t.created_at ASC",
        }
    }
}

/// Insert a PENDING transfer priced by `quote`.
pub(crate) async fn insert_pending<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    beneficiary_id: Uuid,
    subscription_id: Option<Uuid>,
    quote: &Quote,
) -> Result<Transfer, sqlx::Error> {
    sqlx::query_as::<_, Transfer>(
        r#"
        INSERT INTO transfers (
            reference, user_id, beneficiary_id, subscription_id,
            amount_cad_cents, fee_cad_cents, total_cad_cents, amount_mga, exchange_rate
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(generate_reference(Utc::now()))
    .bind(user_id)
    .bind(beneficiary_id)
    .bind(subscription_id)
    .bind(quote.amount_cad_cents)
    .bind(quote.fee_cad_cents)
    .bind(quote.total_cad_cents)
    .bind(quote.amount_mga)
    .bind(quote.exchange_rate)
    .fetch_one(executor)
    .await
}

/// Create a one-time transfer.
///
/// # Process
///
/// 1. Check the beneficiary belongs to the client and is active
/// 2. Price the amount with the current fee schedule and rate
/// 3. Resolve the processor customer, creating it on first use
/// 4. Insert the PENDING transfer
/// 5. When the processor is enabled, open a payment intent for the total
///    and return its client secret
///
/// # Errors
///
/// - `NotFound`: beneficiary unknown, foreign or deleted
/// - `InvalidRequest`: amount outside the configured limits
/// - `Payment`: the processor refused the payment intent (the transfer is
///   marked FAILED)
pub async fn create(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    user_id: Uuid,
    request: CreateTransferRequest,
) -> Result<CreateTransferResponse, AppError> {
    request.validate()?;

    let beneficiary = beneficiary_service::get(pool, user_id, request.beneficiary_id).await?;
    let quote = settings_service::quote(pool, request.amount_cad_cents).await?;

    // Resolve the customer first so a processor error leaves no transfer behind.
    let user = crate::services::auth_service::find_user(pool, user_id).await?;
    let customer_id = subscription_service::ensure_customer(pool, payments, &user).await?;

    let mut transfer = insert_pending(pool, user_id, beneficiary.id, None, &quote).await?;

    let mut payment_client_secret = None;
    if let Some(customer_id) = customer_id {
        let intent = payments
            .create_payment_intent(&NewPaymentIntent {
                customer_id: &customer_id,
                amount_cents: transfer.total_cad_cents,
                transfer_id: transfer.id,
                reference: &transfer.reference,
            })
            .await;

        match intent {
            Ok(intent) => {
                transfer = sqlx::query_as::<_, Transfer>(
                    "UPDATE transfers SET stripe_payment_intent_id = $1 WHERE id = $2 RETURNING *",
                )
                .bind(&intent.id)
                .bind(transfer.id)
                .fetch_one(pool)
                .await?;
                payment_client_secret = intent.client_secret;
            }
            Err(e) => {
                tracing::warn!(transfer_id = %transfer.id, "payment intent refused: {e}");
                mark_failed(pool, transfer.id, &e.to_string()).await?;
                return Err(e.into());
            }
        }
    }

    tracing::info!(
        %user_id,
        transfer_id = %transfer.id,
        reference = %transfer.reference,
        amount_cad_cents = transfer.amount_cad_cents,
        "transfer created"
    );
    announce_created(pool, &transfer, &beneficiary.full_name).await;

    Ok(CreateTransferResponse {
        transfer,
        payment_client_secret,
    })
}

/// Tell the client and the payout team about a new transfer.
pub(crate) async fn announce_created(pool: &DbPool, transfer: &Transfer, beneficiary_name: &str) {
    notification_service::notify(
        pool,
        transfer.user_id,
        NewNotification::new(
            NotificationType::TransferCreated,
            "Transfer created",
            format!(
                "Transfer {} of {} CAD to {} is pending.",
                transfer.reference,
                format_cad(transfer.amount_cad_cents),
                beneficiary_name
            ),
        )
        .for_transfer(transfer.id),
    )
    .await;
    notification_service::notify_role(
        pool,
        Role::MadagascarTeam,
        NewNotification::new(
            NotificationType::TransferCreated,
            "New transfer to deliver",
            format!(
                "{}: {} MGA to {}.",
                transfer.reference, transfer.amount_mga, beneficiary_name
            ),
        )
        .for_transfer(transfer.id),
    )
    .await;
}

/// A client's own transfers.
pub async fn list_for_user(
    pool: &DbPool,
    user_id: Uuid,
    mut filter: TransferFilter,
    page: PageParams,
) -> Result<Page<Transfer>, AppError> {
    filter.validate()?;
    filter.user_id = Some(user_id);

    let mut qb = QueryBuilder::<Postgres>::new("SELECT t.* FROM transfers t WHERE 1 = 1");
    filter.push_conditions(&mut qb);
    qb.push(SortOrder::NewestFirst.sql());
    push_page(&mut qb, page);
    let items = qb.build_query_as::<Transfer>().fetch_all(pool).await?;

    let total = count(pool, &filter).await?;
    Ok(Page::new(items, page, total))
}

pub async fn get_for_user(pool: &DbPool, user_id: Uuid, transfer_id: Uuid) -> Result<Transfer, AppError> {
    sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = $1 AND user_id = $2")
        .bind(transfer_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Transfer"))
}

/// Transfers of every client, joined with beneficiary and client details.
pub async fn list_details(
    pool: &DbPool,
    filter: &TransferFilter,
    page: PageParams,
    order: SortOrder,
) -> Result<Page<TransferDetails>, AppError> {
    filter.validate()?;

    let mut qb = QueryBuilder::<Postgres>::new(DETAILS_SELECT);
    filter.push_conditions(&mut qb);
    qb.push(order.sql());
    push_page(&mut qb, page);
    let items = qb.build_query_as::<TransferDetails>().fetch_all(pool).await?;

    let total = count(pool, filter).await?;
    Ok(Page::new(items, page, total))
}

pub async fn get_details(pool: &DbPool, transfer_id: Uuid) -> Result<TransferDetails, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new(DETAILS_SELECT);
    qb.push(" AND t.id = ").push_bind(transfer_id);
    qb.build_query_as::<TransferDetails>()
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Transfer"))
}

async fn get(pool: &DbPool, transfer_id: Uuid) -> Result<Transfer, AppError> {
    sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = $1")
        .bind(transfer_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Transfer"))
}

async fn count(pool: &DbPool, filter: &TransferFilter) -> Result<i64, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transfers t WHERE 1 = 1");
    filter.push_conditions(&mut qb);
    let total = qb.build_query_scalar::<i64>().fetch_one(pool).await?;
    Ok(total)
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: PageParams) {
    qb.push(" LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());
}

/// Mark a PENDING transfer as delivered.
///
/// Used by both the payout team and admins; `actor_id` is stamped as
/// `confirmed_by`.
///
/// # Errors
///
/// - `NotFound`: unknown transfer
/// - `InvalidRequest`: the transfer is not PENDING
pub async fn confirm(
    pool: &DbPool,
    transfer_id: Uuid,
    actor_id: Uuid,
    request: ConfirmTransferRequest,
) -> Result<Transfer, AppError> {
    request.validate()?;
    let note = request
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let updated = sqlx::query_as::<_, Transfer>(
        r#"
        UPDATE transfers
        SET status = 'COMPLETED',
            confirmed_at = NOW(),
            confirmed_by = $1,
            confirmation_note = $2,
            updated_at = NOW()
        WHERE id = $3 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(actor_id)
    .bind(note)
    .bind(transfer_id)
    .fetch_optional(pool)
    .await?;

    let transfer = match updated {
        Some(transfer) => transfer,
        None => {
            let current = get(pool, transfer_id).await?;
            current.status.ensure_transition(TransferStatus::Completed)?;
            return Err(AppError::invalid("Transfer changed concurrently, try again"));
        }
    };

    tracing::info!(%transfer_id, %actor_id, reference = %transfer.reference, "transfer confirmed");
    notification_service::notify(
        pool,
        transfer.user_id,
        NewNotification::new(
            NotificationType::TransferCompleted,
            "Transfer delivered",
            format!(
                "Transfer {} has been delivered: {} MGA.",
                transfer.reference, transfer.amount_mga
            ),
        )
        .for_transfer(transfer.id),
    )
    .await;

    Ok(transfer)
}

/// Mark a PENDING transfer as failed, e.g. the beneficiary could not be reached.
pub async fn fail(
    pool: &DbPool,
    transfer_id: Uuid,
    actor_id: Uuid,
    request: FailTransferRequest,
) -> Result<Transfer, AppError> {
    request.validate()?;
    let reason = request.reason.trim();

    let transfer = match mark_failed(pool, transfer_id, reason).await? {
        Some(transfer) => transfer,
        None => {
            let current = get(pool, transfer_id).await?;
            current.status.ensure_transition(TransferStatus::Failed)?;
            return Err(AppError::invalid("Transfer changed concurrently, try again"));
        }
    };

    tracing::info!(%transfer_id, %actor_id, reason, "transfer marked failed");
    notify_failed(pool, &transfer, NotificationType::TransferFailed).await;
    Ok(transfer)
}

/// PENDING -> FAILED. Returns `None` when the transfer was not PENDING.
pub(crate) async fn mark_failed(
    pool: &DbPool,
    transfer_id: Uuid,
    reason: &str,
) -> Result<Option<Transfer>, AppError> {
    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        UPDATE transfers
        SET status = 'FAILED', failure_reason = $1, updated_at = NOW()
        WHERE id = $2 AND status = 'PENDING'
        RETURNING *
        "#,
    )
    .bind(reason)
    .bind(transfer_id)
    .fetch_optional(pool)
    .await?;
    Ok(transfer)
}

pub(crate) async fn notify_failed(pool: &DbPool, transfer: &Transfer, kind: NotificationType) {
    let reason = transfer.failure_reason.as_deref().unwrap_or("unknown reason");
    notification_service::notify(
        pool,
        transfer.user_id,
        NewNotification::new(
            kind,
            "Transfer failed",
            format!("Transfer {} failed: {reason}", transfer.reference),
        )
        .for_transfer(transfer.id),
    )
    .await;
}

/// Result of the processor step of a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPayment {
    /// An open invoice was paid
    Paid { invoice_id: String },
    /// Nothing to pay (no open invoice, no processor subscription, or the
    /// processor is disabled); the transfer goes back to the queue as is.
    NothingToPay,
}

/// Pay the latest open invoice of a processor subscription.
///
/// Fails with `Payment` when the processor refuses; the caller must then
/// leave the transfer FAILED.
pub async fn settle_retry_payment(
    payments: &dyn PaymentProcessor,
    processor_subscription_id: Option<&str>,
) -> Result<RetryPayment, AppError> {
    let Some(processor_id) = processor_subscription_id else {
        return Ok(RetryPayment::NothingToPay);
    };
    if !payments.is_enabled() {
        return Ok(RetryPayment::NothingToPay);
    }

    match payments.latest_open_invoice(processor_id).await? {
        Some(invoice) => {
            let paid = payments.pay_invoice(&invoice.id).await?;
            if !paid.is_paid() {
                return Err(AppError::Payment(format!(
                    "Invoice {} is still {}",
                    paid.id,
                    paid.status.as_deref().unwrap_or("unpaid")
                )));
            }
            Ok(RetryPayment::Paid { invoice_id: paid.id })
        }
        None => Ok(RetryPayment::NothingToPay),
    }
}

/// Admin retry of a FAILED transfer.
///
/// # Process
///
/// 1. Only FAILED transfers are retryable
/// 2. Subscription transfers: pay the subscription's latest open invoice.
///    If the processor refuses, the transfer stays FAILED and the
///    processor's message is returned.
/// 3. Move to PENDING, clear the failure reason, bump `retry_count`
/// 4. Notify the client
///
/// One-time transfers skip step 2 and return to the queue for manual handling.
pub async fn retry(
    pool: &DbPool,
    payments: &dyn PaymentProcessor,
    transfer_id: Uuid,
    admin_id: Uuid,
) -> Result<Transfer, AppError> {
    let current = get(pool, transfer_id).await?;
    let plan = current.retry_plan()?;

    let payment = match plan {
        RetryPlan::PayLatestInvoice { subscription_id } => {
            let subscription =
                sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
                    .bind(subscription_id)
                    .fetch_optional(pool)
                    .await?
                    .ok_or(AppError::NotFound("Subscription"))?;

            let result =
                settle_retry_payment(payments, subscription.stripe_subscription_id.as_deref()).await;
            if let Err(e) = &result {
                tracing::warn!(%transfer_id, "retry payment failed, transfer stays FAILED: {e}");
            }
            result?
        }
        RetryPlan::ManualReview => RetryPayment::NothingToPay,
    };

    let invoice_id = match &payment {
        RetryPayment::Paid { invoice_id } => Some(invoice_id.as_str()),
        RetryPayment::NothingToPay => None,
    };

    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        UPDATE transfers
        SET status = 'PENDING',
            failure_reason = NULL,
            retry_count = retry_count + 1,
            stripe_invoice_id = COALESCE($1, stripe_invoice_id),
            updated_at = NOW()
        WHERE id = $2 AND status = 'FAILED'
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(transfer_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::invalid("Transfer changed concurrently, try again"))?;

    tracing::info!(
        %transfer_id,
        %admin_id,
        retry_count = transfer.retry_count,
        payment = ?payment,
        "transfer retried"
    );
    notification_service::notify(
        pool,
        transfer.user_id,
        NewNotification::new(
            NotificationType::TransferRetried,
            "Transfer retried",
            format!("Transfer {} is being processed again.", transfer.reference),
        )
        .for_transfer(transfer.id),
    )
    .await;

    Ok(transfer)
}
