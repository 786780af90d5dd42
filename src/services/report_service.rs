//! Report service - dashboards and aggregate statistics.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        notification::Notification,
        pagination::PageParams,
        report::{
            AdminStats, ClientDashboard, DailyReportRow, ReportRange, StatusCounts,
            TeamDashboard, TransferCounts,
        },
        transfer::{Transfer, TransferFilter, TransferStatus},
    },
    services::{
        notification_service,
        transfer_service::{self, SortOrder},
    },
};

const RECENT_ITEMS: i64 = 5;
const TEAM_QUEUE_HEAD: i64 = 10;

pub async fn client_dashboard(pool: &DbPool, user_id: Uuid) -> Result<ClientDashboard, AppError> {
    let (beneficiary_count, active_subscription_count, total_sent_cad_cents, pending_transfer_count): (
        i64,
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM beneficiaries WHERE user_id = $1 AND is_active = TRUE),
            (SELECT COUNT(*) FROM subscriptions WHERE user_id = $1 AND status = 'ACTIVE'),
            (SELECT COALESCE(SUM(amount_cad_cents), 0)::BIGINT FROM transfers
                WHERE user_id = $1 AND status = 'COMPLETED'),
            (SELECT COUNT(*) FROM transfers WHERE user_id = $1 AND status = 'PENDING')
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let recent_transfers = sqlx::query_as::<_, Transfer>(
        "SELECT * FROM transfers WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(user_id)
    .bind(RECENT_ITEMS)
    .fetch_all(pool)
    .await?;

    let recent_notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(user_id)
    .bind(RECENT_ITEMS)
    .fetch_all(pool)
    .await?;

    Ok(ClientDashboard {
        beneficiary_count,
        active_subscription_count,
        total_sent_cad_cents,
        pending_transfer_count,
        unread_notifications: notification_service::unread_count(pool, user_id).await?,
        recent_transfers,
        recent_notifications,
    })
}

pub async fn team_dashboard(pool: &DbPool) -> Result<TeamDashboard, AppError> {
    let (pending_count, pending_amount_mga, completed_today, failed_today): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING'),
                COALESCE(SUM(amount_mga) FILTER (WHERE status = 'PENDING'), 0)::BIGINT,
                COUNT(*) FILTER (WHERE status = 'COMPLETED' AND confirmed_at >= CURRENT_DATE),
                COUNT(*) FILTER (WHERE status = 'FAILED' AND updated_at >= CURRENT_DATE)
            FROM transfers
            "#,
        )
        .fetch_one(pool)
        .await?;

    let queue = transfer_service::list_details(
        pool,
        &TransferFilter {
            status: Some(TransferStatus::Pending),
            ..Default::default()
        },
        PageParams {
            page: 1,
            limit: TEAM_QUEUE_HEAD,
        },
        SortOrder::OldestFirst,
    )
    .await?;

    Ok(TeamDashboard {
        pending_count,
        pending_amount_mga,
        completed_today,
        failed_today,
        oldest_pending: queue.items,
    })
}

pub async fn admin_stats(pool: &DbPool) -> Result<AdminStats, AppError> {
    let users = sqlx::query_as::<_, StatusCounts>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'ACTIVE') AS active,
            COUNT(*) FILTER (WHERE status = 'INACTIVE') AS inactive,
            COUNT(*) FILTER (WHERE status = 'SUSPENDED') AS suspended
        FROM users
        "#,
    )
    .fetch_one(pool)
    .await?;

    let clients: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'CLIENT'")
        .fetch_one(pool)
        .await?;

    let transfers = sqlx::query_as::<_, TransferCounts>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
            COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed,
            COUNT(*) FILTER (WHERE status = 'FAILED') AS failed
        FROM transfers
        "#,
    )
    .fetch_one(pool)
    .await?;

    let (completed_volume_cad_cents, completed_volume_mga, fees_collected_cad_cents): (i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount_cad_cents), 0)::BIGINT,
                COALESCE(SUM(amount_mga), 0)::BIGINT,
                COALESCE(SUM(fee_cad_cents), 0)::BIGINT
            FROM transfers
            WHERE status = 'COMPLETED'
            "#,
        )
        .fetch_one(pool)
        .await?;

    let active_subscriptions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE status = 'ACTIVE'")
            .fetch_one(pool)
            .await?;

    Ok(AdminStats {
        users,
        clients,
        transfers,
        completed_volume_cad_cents,
        completed_volume_mga,
        fees_collected_cad_cents,
        active_subscriptions,
    })
}

/// One row per calendar day (UTC) in the range, including empty days.
pub async fn daily_report(pool: &DbPool, range: &ReportRange) -> Result<Vec<DailyReportRow>, AppError> {
    let (from, to) = range.resolve(Utc::now().date_naive())?;

    let rows = sqlx::query_as::<_, DailyReportRow>(
        r#"
        SELECT
            d.day::DATE AS day,
            COUNT(t.id) AS transfer_count,
            COUNT(t.id) FILTER (WHERE t.status = 'COMPLETED') AS completed_count,
            COUNT(t.id) FILTER (WHERE t.status = 'FAILED') AS failed_count,
            COALESCE(SUM(t.amount_cad_cents) FILTER (WHERE t.status = 'COMPLETED'), 0)::BIGINT AS volume_cad_cents,
            COALESCE(SUM(t.fee_cad_cents) FILTER (WHERE t.status = 'COMPLETED'), 0)::BIGINT AS fees_cad_cents,
            COALESCE(SUM(t.amount_mga) FILTER (WHERE t.status = 'COMPLETED'), 0)::BIGINT AS volume_mga
        FROM generate_series($1::DATE, $2::DATE, INTERVAL '1 day') AS d(day)
        LEFT JOIN transfers t
            ON (t.created_at AT TIME ZONE 'UTC')::DATE = d.day::DATE
        GROUP BY d.day
        ORDER BY d.day
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
