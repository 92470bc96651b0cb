//! # Wallet Sync Worker
//!
//! Drains due wallet jobs: claims each one, dispatches it to the matching vendor
//! driver under a deadline, and records the outcome with exponential backoff on
//! retryable failures. Ticks are triggered over HTTP, from the CLI, or by the
//! optional in-process loop in [`WalletSyncWorker::run`].

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::drivers::{PushStatus, WalletDrivers, WalletError};
use crate::error::QueueError;
use crate::jobs::{JobOutcome, WalletJobPayload, WalletJobType, backoff_seconds};
use crate::models::wallet_job::Model as WalletJob;
use crate::repositories::WalletJobQueue;

/// Result of one worker tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TickSummary {
    /// Jobs finished without error (succeeded or abandoned)
    pub processed: u64,
    /// Jobs whose attempt failed, including store errors while finalizing
    pub failed: u64,
    /// Due jobs fetched this tick
    pub total: u64,
    pub succeeded: u64,
    pub given_up: u64,
    pub abandoned: u64,
    pub retried: u64,
    /// Jobs claimed by another worker first
    pub skipped: u64,
}

/// How a single claimed job ended this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobResult {
    Succeeded,
    Retried,
    GivenUp,
    Abandoned,
}

/// Background worker draining the wallet job queue.
#[derive(Clone)]
pub struct WalletSyncWorker {
    queue: WalletJobQueue,
    drivers: WalletDrivers,
    config: WorkerConfig,
}

impl WalletSyncWorker {
    pub fn new(queue: WalletJobQueue, drivers: WalletDrivers, config: WorkerConfig) -> Self {
        Self {
            queue,
            drivers,
            config,
        }
    }

    pub fn queue(&self) -> &WalletJobQueue {
        &self.queue
    }

    /// Tick on an interval until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            "Starting wallet sync worker"
        );
        let tick_interval = StdDuration::from_secs(self.config.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Wallet sync worker shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Wallet sync tick failed");
                    }
                }
            }
        }

        info!("Wallet sync worker stopped");
    }

    /// Process one batch of due jobs.
    pub async fn tick(&self) -> Result<TickSummary, QueueError> {
        self.tick_at(Utc::now()).await
    }

    /// Process one batch of jobs due at `now`.
    ///
    /// Only a failure to read the queue aborts the tick; per-job failures are
    /// logged and counted.
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, QueueError> {
        let tick_started = Instant::now();
        let mut summary = TickSummary::default();

        let due = self.queue.fetch_due(now, self.config.batch_size).await?;
        summary.total = due.len() as u64;

        for job in due {
            let job_id = job.id;
            match self.process_job(job, now).await {
                Ok(None) => summary.skipped += 1,
                Ok(Some(JobResult::Succeeded)) => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                }
                Ok(Some(JobResult::Abandoned)) => {
                    summary.processed += 1;
                    summary.abandoned += 1;
                }
                Ok(Some(JobResult::Retried)) => {
                    summary.failed += 1;
                    summary.retried += 1;
                }
                Ok(Some(JobResult::GivenUp)) => {
                    summary.failed += 1;
                    summary.given_up += 1;
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(error = ?err, job_id = %job_id, "Failed to finalize wallet job");
                }
            }
        }

        histogram!("wallet_sync_tick_duration_ms")
            .record(tick_started.elapsed().as_secs_f64() * 1_000.0);

        if summary.total > 0 {
            info!(
                total = summary.total,
                processed = summary.processed,
                failed = summary.failed,
                retried = summary.retried,
                given_up = summary.given_up,
                abandoned = summary.abandoned,
                skipped = summary.skipped,
                "Wallet sync tick completed"
            );
        } else {
            debug!("Wallet sync tick found no due jobs");
        }

        Ok(summary)
    }

    /// Claim and run one job. `Ok(None)` means another worker owns it.
    async fn process_job(
        &self,
        job: WalletJob,
        now: DateTime<Utc>,
    ) -> Result<Option<JobResult>, QueueError> {
        let lease = Duration::seconds(self.config.lease_seconds as i64);
        let Some(job) = self.queue.claim(job.id, now, lease).await? else {
            debug!(job_id = %job.id, "Wallet job claimed elsewhere, skipping");
            return Ok(None);
        };

        let job_type = match job.job_type.parse::<WalletJobType>() {
            Ok(job_type) => job_type,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Abandoning wallet job of unknown type");
                self.queue
                    .mark_done(job.id, JobOutcome::AbandonedUnknownType)
                    .await?;
                counter!("wallet_jobs_abandoned_total").increment(1);
                return Ok(Some(JobResult::Abandoned));
            }
        };

        let attempt = match WalletJobPayload::decode(job_type, &job.payload) {
            Ok(payload) => self.dispatch(job.id, payload).await,
            Err(err) => Err(err),
        };

        match attempt {
            Ok(()) => {
                self.queue.mark_done(job.id, JobOutcome::Succeeded).await?;
                counter!("wallet_jobs_succeeded_total", "job_type" => job_type.as_str())
                    .increment(1);
                debug!(job_id = %job.id, job_type = %job_type, "Wallet job succeeded");
                Ok(Some(JobResult::Succeeded))
            }
            Err(err) => self.record_failure(&job, job_type, err, now).await.map(Some),
        }
    }

    /// Run the vendor call for a decoded payload under the vendor deadline.
    async fn dispatch(&self, job_id: Uuid, payload: WalletJobPayload) -> Result<(), WalletError> {
        let deadline = StdDuration::from_secs(self.config.vendor_timeout_seconds);

        match timeout(deadline, self.call_driver(job_id, &payload)).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::Timeout(deadline)),
        }
    }

    async fn call_driver(
        &self,
        job_id: Uuid,
        payload: &WalletJobPayload,
    ) -> Result<(), WalletError> {
        match payload {
            WalletJobPayload::GooglePatch(p) => {
                self.drivers.google.apply(&p.object_id, p.balance).await
            }
            WalletJobPayload::ApplePkpassRegenerate(p) => {
                let outcome = self
                    .drivers
                    .apple
                    .apply(&p.pass_id, p.device_token.as_deref())
                    .await?;
                if let (PushStatus::Failed(push_err), Some(token)) =
                    (&outcome.push, p.device_token.as_deref())
                {
                    self.enqueue_push_follow_up(job_id, &p.pass_id, token, push_err)
                        .await?;
                }
                Ok(())
            }
            WalletJobPayload::ApplePushNotify(p) => {
                self.drivers.apple.push(&p.pass_id, &p.device_token).await
            }
        }
    }

    /// Hand a failed push to its own job so it retries without regenerating again.
    ///
    /// If the follow-up cannot be stored the push error is returned, which retries
    /// the whole regenerate job instead.
    async fn enqueue_push_follow_up(
        &self,
        job_id: Uuid,
        pass_id: &str,
        device_token: &str,
        push_err: &WalletError,
    ) -> Result<(), WalletError> {
        let follow_up = WalletJobPayload::apple_push(pass_id, device_token);
        match self.queue.enqueue(&follow_up).await {
            Ok(push_job_id) => {
                info!(
                    job_id = %job_id,
                    push_job_id = %push_job_id,
                    pass_id,
                    "Pass regenerated; push handed to follow-up job"
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    job_id = %job_id,
                    error = ?err,
                    "Failed to enqueue follow-up push job"
                );
                Err(push_err.clone())
            }
        }
    }

    async fn record_failure(
        &self,
        job: &WalletJob,
        job_type: WalletJobType,
        err: WalletError,
        now: DateTime<Utc>,
    ) -> Result<JobResult, QueueError> {
        let attempts = job.attempts.saturating_add(1);
        let details = err.to_details();

        if !err.is_retryable() || attempts >= job.max_attempts {
            self.queue.give_up(job.id, attempts, details).await?;
            counter!("wallet_jobs_given_up_total", "job_type" => job_type.as_str()).increment(1);
            error!(
                alert = true,
                job_id = %job.id,
                job_type = %job_type,
                attempts,
                max_attempts = job.max_attempts,
                error_kind = err.kind_label(),
                error = %err,
                "Wallet job given up"
            );
            return Ok(JobResult::GivenUp);
        }

        let backoff = backoff_seconds(attempts, self.config.retry_base_seconds);
        self.queue
            .mark_attempt_failed(job.id, attempts, backoff, details, now)
            .await?;
        counter!("wallet_jobs_retried_total", "job_type" => job_type.as_str()).increment(1);
        warn!(
            job_id = %job.id,
            job_type = %job_type,
            attempts,
            backoff_seconds = backoff,
            error_kind = err.kind_label(),
            error = %err,
            "Wallet job attempt failed, retrying later"
        );

        Ok(JobResult::Retried)
    }
}
