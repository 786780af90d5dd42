//! Notification service - user-facing messages keyed to lifecycle events.
//!
//! Writers call [`notify`] / [`notify_role`], which never fail: a
//! notification that cannot be stored is logged and dropped, and the
//! operation that triggered it carries on.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        notification::{NewNotification, Notification, NotificationFilter},
        pagination::{Page, PageParams},
        user::Role,
    },
};

async fn insert(pool: &DbPool, user_id: Uuid, notification: &NewNotification) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO notifications (user_id, notification_type, title, message, transfer_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(notification.notification_type)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.transfer_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store a notification for one user (fire-and-forget).
pub async fn notify(pool: &DbPool, user_id: Uuid, notification: NewNotification) {
    if let Err(e) = insert(pool, user_id, &notification).await {
        tracing::warn!(
            %user_id,
            kind = ?notification.notification_type,
            "failed to store notification: {e}"
        );
    }
}

/// Store the same notification for every active user holding `role`.
pub async fn notify_role(pool: &DbPool, role: Role, notification: NewNotification) {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, notification_type, title, message, transfer_id)
        SELECT id, $2, $3, $4, $5 FROM users WHERE role = $1 AND status = 'ACTIVE'
        "#,
    )
    .bind(role)
    .bind(notification.notification_type)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.transfer_id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(?role, "failed to broadcast notification: {e}");
    }
}

/// Newest first.
pub async fn list(
    pool: &DbPool,
    user_id: Uuid,
    filter: &NotificationFilter,
    page: PageParams,
) -> Result<Page<Notification>, AppError> {
    let items = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1 AND ($2 = FALSE OR is_read = FALSE)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(filter.unread_only)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND ($2 = FALSE OR is_read = FALSE)",
    )
    .bind(user_id)
    .bind(filter.unread_only)
    .fetch_one(pool)
    .await?;

    Ok(Page::new(items, page, total))
}

pub async fn unread_count(pool: &DbPool, user_id: Uuid) -> Result<i64, AppError> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn mark_read(
    pool: &DbPool,
    user_id: Uuid,
    notification_id: Uuid,
) -> Result<Notification, AppError> {
    sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications
        SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(notification_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Notification"))
}

/// Returns the number of notifications that changed.
pub async fn mark_all_read(pool: &DbPool, user_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete(pool: &DbPool, user_id: Uuid, notification_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification"));
    }
    Ok(())
}
