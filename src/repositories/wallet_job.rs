//! # WalletJob Repository
//!
//! The durable queue behind wallet synchronization. Every mutation is a single
//! conditional UPDATE, so concurrent workers never need a transaction to agree on
//! who owns a job.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::{JobOutcome, JobStatus, MAX_BACKOFF_SECONDS, WalletJobPayload};
use crate::models::wallet_job::{ActiveModel, Column, Entity, Model};

/// Queue API over the `wallet_jobs` table
#[derive(Clone)]
pub struct WalletJobQueue {
    db: DatabaseConnection,
    default_max_attempts: i32,
}

impl WalletJobQueue {
    /// Create a queue that stamps `default_max_attempts` on new jobs
    pub fn new(db: DatabaseConnection, default_max_attempts: i32) -> Self {
        Self {
            db,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    pub fn default_max_attempts(&self) -> i32 {
        self.default_max_attempts
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Validate the payload and insert a `pending` job due immediately.
    ///
    /// Never deduplicates: enqueueing the same payload twice yields two jobs.
    pub async fn enqueue(&self, payload: &WalletJobPayload) -> Result<Uuid, QueueError> {
        self.enqueue_with_max_attempts(payload, self.default_max_attempts)
            .await
    }

    /// Like [`enqueue`](Self::enqueue) with an explicit attempt ceiling.
    pub async fn enqueue_with_max_attempts(
        &self,
        payload: &WalletJobPayload,
        max_attempts: i32,
    ) -> Result<Uuid, QueueError> {
        payload.validate()?;

        let now = Utc::now().fixed_offset();
        let job_type = payload.job_type();

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            job_type: Set(job_type.as_str().to_string()),
            payload: Set(payload.to_json()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            outcome: Set(None),
            attempts: Set(0),
            max_attempts: Set(max_attempts.max(1)),
            next_attempt_at: Set(now),
            lease_expires_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = job
            .insert(&self.db)
            .await
            .map_err(|e| QueueError::store("insert wallet job", e))?;

        counter!("wallet_jobs_enqueued_total", "job_type" => job_type.as_str()).increment(1);
        tracing::info!(
            job_id = %inserted.id,
            job_type = %job_type,
            max_attempts = inserted.max_attempts,
            "Wallet job enqueued"
        );

        Ok(inserted.id)
    }

    /// Jobs that may be attempted at `now`, oldest due first.
    ///
    /// Excludes `done` jobs, jobs scheduled in the future, and `in_flight` jobs whose
    /// lease has not expired. Reads only.
    pub async fn fetch_due(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Model>, QueueError> {
        let now = to_db_time(now);

        Entity::find()
            .filter(Column::Status.ne(JobStatus::Done.as_str()))
            .filter(Column::NextAttemptAt.lte(now))
            .filter(lease_available(now))
            .order_by_asc(Column::NextAttemptAt)
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| QueueError::store("fetch due wallet jobs", e))
    }

    /// Take a time-bounded claim on a due job.
    ///
    /// Returns `None` when the job is done, not yet due, or leased by another worker.
    pub async fn claim(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Model>, QueueError> {
        let lease_expires_at = now.checked_add_signed(lease).unwrap_or(now);
        let now = to_db_time(now);

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::InFlight.as_str()))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Some(to_db_time(lease_expires_at))),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.ne(JobStatus::Done.as_str()))
            .filter(Column::NextAttemptAt.lte(now))
            .filter(lease_available(now))
            .exec(&self.db)
            .await
            .map_err(|e| QueueError::store("claim wallet job", e))?;

        if result.rows_affected == 0 {
            tracing::debug!(job_id = %job_id, "Wallet job not claimable");
            return Ok(None);
        }

        self.find(job_id).await
    }

    /// Move a job to `done` with the given outcome.
    ///
    /// A job that is already done is left untouched; only an unknown id is an error.
    pub async fn mark_done(&self, job_id: Uuid, outcome: JobOutcome) -> Result<(), QueueError> {
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Done.as_str()))
            .col_expr(Column::Outcome, Expr::value(Some(outcome.as_str().to_string())))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.ne(JobStatus::Done.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| QueueError::store("mark wallet job done", e))?;

        if result.rows_affected == 0 {
            return self.ensure_exists(job_id).await;
        }

        tracing::debug!(job_id = %job_id, outcome = %outcome, "Wallet job done");
        Ok(())
    }

    /// Record a failed attempt and reschedule the job `backoff_seconds` after `now`.
    ///
    /// Does not enforce the attempt ceiling; callers decide between this and
    /// [`give_up`](Self::give_up). Never touches a job that is already done.
    pub async fn mark_attempt_failed(
        &self,
        job_id: Uuid,
        attempts: i32,
        backoff_seconds: u64,
        error: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let delay = Duration::seconds(backoff_seconds.min(MAX_BACKOFF_SECONDS) as i64);
        let next_attempt_at = to_db_time(now + delay);

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Retrying.as_str()))
            .col_expr(Column::Attempts, Expr::value(attempts))
            .col_expr(Column::NextAttemptAt, Expr::value(next_attempt_at))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(Column::LastError, Expr::value(Some(error)))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.ne(JobStatus::Done.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| QueueError::store("reschedule wallet job", e))?;

        if result.rows_affected == 0 {
            return self.ensure_exists(job_id).await;
        }

        Ok(())
    }

    /// Terminally fail a job: `done` with outcome `given_up`.
    pub async fn give_up(
        &self,
        job_id: Uuid,
        attempts: i32,
        error: JsonValue,
    ) -> Result<(), QueueError> {
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Done.as_str()))
            .col_expr(
                Column::Outcome,
                Expr::value(Some(JobOutcome::GivenUp.as_str().to_string())),
            )
            .col_expr(Column::Attempts, Expr::value(attempts))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .col_expr(Column::LastError, Expr::value(Some(error)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.ne(JobStatus::Done.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| QueueError::store("give up wallet job", e))?;

        if result.rows_affected == 0 {
            return self.ensure_exists(job_id).await;
        }

        Ok(())
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, QueueError> {
        Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(|e| QueueError::store("find wallet job", e))
    }

    async fn ensure_exists(&self, job_id: Uuid) -> Result<(), QueueError> {
        match self.find(job_id).await? {
            Some(_) => Ok(()),
            None => Err(QueueError::JobNotFound(job_id)),
        }
    }
}

/// Rows not held by a live lease.
fn lease_available(now: DateTime<FixedOffset>) -> Condition {
    Condition::any()
        .add(Column::Status.ne(JobStatus::InFlight.as_str()))
        .add(Column::LeaseExpiresAt.is_null())
        .add(Column::LeaseExpiresAt.lte(now))
}

/// Timestamps are always stored with a zero offset so they order lexically on SQLite.
fn to_db_time(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.fixed_offset()
}
