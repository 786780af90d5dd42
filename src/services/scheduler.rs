//! Scheduled jobs - turns due subscriptions into transfers.
//!
//! One background task ticks every `interval`. Each tick:
//! - creates a PENDING transfer for every ACTIVE subscription whose
//!   `next_transfer_date` has arrived, then moves the date forward
//!   and applies any invoice event that arrived ahead of it
//! - purges expired sessions and stale deferred invoice events
//!
//! The task can be started and stopped at runtime from the admin API.
//! A failing subscription is logged and counted; it never aborts the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        settings::FeeSchedule,
        notification::NotificationType,
        subscription::{Frequency, Subscription},
        transfer::TransferStatus,
    },
    services::{
        auth_service, beneficiary_service::BENEFICIARY_GONE, settings_service, transfer_service,
        webhook_service,
    },
};

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub due_subscriptions: usize,
    pub transfers_created: usize,
    pub failures: usize,
    pub sessions_purged: u64,
    pub deferred_events_purged: u64,
}

/// `GET /api/v1/admin/jobs`
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub total_runs: u64,
    pub last_run: Option<JobRunSummary>,
}

struct JobsInner {
    pool: DbPool,
    interval: Duration,
    last_run: Mutex<Option<JobRunSummary>>,
    total_runs: AtomicU64,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ScheduledJobsService {
    inner: Arc<JobsInner>,
    worker: Mutex<Option<Worker>>,
}

impl ScheduledJobsService {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self {
            inner: Arc::new(JobsInner {
                pool,
                interval,
                last_run: Mutex::new(None),
                total_runs: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the background task. Returns `false` if it is already running.
    ///
    /// The first run happens one interval after start.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let period = inner.interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = inner.run_once().await {
                            tracing::error!("scheduled job run failed: {e}");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("scheduled jobs stopped");
        });

        *worker = Some(Worker { shutdown, handle });
        tracing::info!(interval_secs = self.inner.interval.as_secs(), "scheduled jobs started");
        true
    }

    /// Stop the background task and wait for an in-flight run to finish.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().await.take() else {
            return false;
        };
        if worker.handle.is_finished() {
            return false;
        }

        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            tracing::error!("scheduled jobs task ended abnormally: {e}");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub async fn status(&self) -> JobStatus {
        JobStatus {
            running: self.is_running().await,
            interval_secs: self.inner.interval.as_secs(),
            total_runs: self.inner.total_runs.load(Ordering::Relaxed),
            last_run: self.inner.last_run.lock().await.clone(),
        }
    }

    /// Run the jobs now, independently of the background task.
    pub async fn run_once(&self) -> Result<JobRunSummary, AppError> {
        self.inner.run_once().await
    }
}

impl JobsInner {
    async fn run_once(&self) -> Result<JobRunSummary, AppError> {
        let started_at = Utc::now();
        let today = started_at.date_naive();

        let schedule = settings_service::fee_schedule(&self.pool).await?;
        let rate = settings_service::current_rate(&self.pool).await?.rate;

        let due: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM subscriptions
            WHERE status = 'ACTIVE' AND next_transfer_date <= $1
            ORDER BY next_transfer_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut transfers_created = 0;
        let mut failures = 0;
        for subscription_id in &due {
            match process_subscription(&self.pool, *subscription_id, today, &schedule, rate).await {
                Ok(true) => transfers_created += 1,
                Ok(false) => {}
                Err(e) => {
                    failures += 1;
                    tracing::error!(%subscription_id, "recurring transfer failed: {e}");
                }
            }
        }

        let sessions_purged = match auth_service::purge_expired_sessions(&self.pool).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("session purge failed: {e}");
                0
            }
        };

        let deferred_events_purged = match webhook_service::purge_stale_deferred(&self.pool).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("deferred event purge failed: {e}");
                0
            }
        };

        let summary = JobRunSummary {
            started_at,
            finished_at: Utc::now(),
            due_subscriptions: due.len(),
            transfers_created,
            failures,
            sessions_purged,
            deferred_events_purged,
        };
        tracing::info!(
            due = summary.due_subscriptions,
            created = summary.transfers_created,
            failures = summary.failures,
            sessions_purged = summary.sessions_purged,
            "scheduled jobs run complete"
        );

        *self.last_run.lock().await = Some(summary.clone());
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        Ok(summary)
    }
}

/// Create the transfer for one due subscription.
///
/// Returns `Ok(false)` when another worker already handled it or it is no
/// longer due.
async fn process_subscription(
    pool: &DbPool,
    subscription_id: Uuid,
    today: NaiveDate,
    schedule: &FeeSchedule,
    rate: Decimal,
) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    // SKIP LOCKED: a concurrent run (manual trigger during a tick) passes over it.
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT * FROM subscriptions
        WHERE id = $1 AND status = 'ACTIVE' AND next_transfer_date <= $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(subscription_id)
    .bind(today)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(subscription) = subscription else {
        return Ok(false);
    };

    let beneficiary_name: Option<String> = sqlx::query_scalar(
        "SELECT full_name FROM beneficiaries WHERE id = $1 AND is_active = TRUE",
    )
    .bind(subscription.beneficiary_id)
    .fetch_optional(&mut *tx)
    .await?;
    let beneficiary_name =
        beneficiary_name.ok_or_else(|| AppError::invalid(BENEFICIARY_GONE))?;

    let quote = schedule.quote(subscription.amount_cad_cents, rate)?;
    let mut transfer = transfer_service::insert_pending(
        &mut *tx,
        subscription.user_id,
        subscription.beneficiary_id,
        Some(subscription.id),
        &quote,
    )
    .await?;
    if let Some(processor_id) = subscription.stripe_subscription_id.as_deref() {
        transfer = webhook_service::apply_deferred(&mut *tx, processor_id, transfer).await?;
    }

    sqlx::query("UPDATE subscriptions SET next_transfer_date = $1, updated_at = NOW() WHERE id = $2")
        .bind(next_date_after(subscription.frequency, subscription.next_transfer_date, today))
        .bind(subscription.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        %subscription_id,
        transfer_id = %transfer.id,
        reference = %transfer.reference,
        "recurring transfer created"
    );
    transfer_service::announce_created(pool, &transfer, &beneficiary_name).await;
    if transfer.status == TransferStatus::Failed {
        transfer_service::notify_failed(pool, &transfer, NotificationType::PaymentFailed).await;
    }
    Ok(true)
}

/// First scheduled date strictly after `today`.
///
/// Periods missed while the job was stopped are skipped rather than
/// generating a burst of catch-up transfers.
fn next_date_after(frequency: Frequency, due: NaiveDate, today: NaiveDate) -> NaiveDate {
    let mut next = frequency.advance(due);
    while next <= today {
        let advanced = frequency.advance(next);
        if advanced == next {
            break;
        }
        next = advanced;
    }
    next
}
