//! Notification HTTP handlers (any authenticated user).

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    extract::{AppPath, AppQuery},
    middleware::auth::AuthContext,
    models::{
        notification::{Notification, NotificationFilter, UnreadCount},
        pagination::{Page, PageParams},
    },
    services::notification_service,
};

/// `GET /api/v1/notifications?unread_only=true&page=1`
pub async fn list_notifications(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppQuery(filter): AppQuery<NotificationFilter>,
    AppQuery(page): AppQuery<PageParams>,
) -> Result<Json<Page<Notification>>, AppError> {
    Ok(Json(
        notification_service::list(&pool, auth.user_id, &filter, page).await?,
    ))
}

pub async fn unread_count(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UnreadCount>, AppError> {
    let unread = notification_service::unread_count(&pool, auth.user_id).await?;
    Ok(Json(UnreadCount { unread }))
}

pub async fn mark_read(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(notification_id): AppPath<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(
        notification_service::mark_read(&pool, auth.user_id, notification_id).await?,
    ))
}

pub async fn mark_all_read(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Value>, AppError> {
    let updated = notification_service::mark_all_read(&pool, auth.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn delete_notification(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    AppPath(notification_id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    notification_service::delete(&pool, auth.user_id, notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
