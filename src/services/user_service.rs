//! User administration - listing accounts and changing their status.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        notification::{NewNotification, NotificationType},
        pagination::{Page, PageParams},
        user::{User, UserFilter, UserStatus},
    },
    services::{auth_service, notification_service},
    validation::contains_pattern,
};

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        qb.push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR (first_name || ' ' || last_name) ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Newest accounts first.
pub async fn list(pool: &DbPool, filter: &UserFilter, page: PageParams) -> Result<Page<User>, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users WHERE 1 = 1");
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());
    let items = qb.build_query_as::<User>().fetch_all(pool).await?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE 1 = 1");
    push_filter(&mut count, filter);
    let total = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    Ok(Page::new(items, page, total))
}

/// Change an account's status.
///
/// Suspending or deactivating an account also ends its sessions. Admins
/// cannot change their own status, so the last admin cannot lock themselves out.
pub async fn update_status(
    pool: &DbPool,
    admin_id: Uuid,
    user_id: Uuid,
    status: UserStatus,
) -> Result<User, AppError> {
    if admin_id == user_id {
        return Err(AppError::invalid("You cannot change your own account status"));
    }
    let current = auth_service::find_user(pool, user_id).await?;
    if current.status == status {
        return Ok(current);
    }

    let mut tx = pool.begin().await?;
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if status != UserStatus::Active {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(%admin_id, %user_id, ?status, "user status changed");
    notification_service::notify(
        pool,
        user_id,
        NewNotification::new(
            NotificationType::Account,
            "Account status changed",
            format!("Your account is now {}.", status_label(status)),
        ),
    )
    .await;

    Ok(user)
}

fn status_label(status: UserStatus) -> &'static str {
    match status {
        UserStatus::Active => "active",
        UserStatus::Inactive => "inactive",
        UserStatus::Suspended => "suspended",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;

    #[test]
    fn filter_sql() {
        let filter = UserFilter {
            role: Some(Role::Client),
            status: None,
            search: Some(" rakoto ".into()),
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users WHERE 1 = 1");
        push_filter(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM users WHERE 1 = 1 AND role = $1 AND (email ILIKE $2 \
             OR (first_name || ' ' || last_name) ILIKE $3)"
        );
    }

    #[test]
    fn blank_search_is_ignored() {
        let filter = UserFilter {
            search: Some("   ".into()),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users WHERE 1 = 1");
        push_filter(&mut qb, &filter);
        assert_eq!(qb.sql(), "SELECT * FROM users WHERE 1 = 1");
    }

    #[tokio::test]
    async fn admins_cannot_change_their_own_status() {
        let pool = crate::db::create_lazy_pool(&crate::config::Config::for_tests().database_url)
            .unwrap();
        let id = Uuid::new_v4();
        let err = update_status(&pool, id, id, UserStatus::Suspended)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
