//! # Retry Handling
//!
//! [`RetryCoordinator`] turns a worker outcome into queue state: success,
//! a scheduled retry with backoff, or escalation to the dead-letter queue.
//! [`RetryPoller`] is the background loop that moves due retries from
//! `failed` back to `pending` so they can be claimed again.

use chrono::{DateTime, Utc};
use metrics::histogram;
use sea_orm::TransactionTrait;
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetryPollerConfig;
use crate::error::{QueueError, map_db_err};
use crate::models::{DeadLetterEntry, JobRecord, JobStatus};
use crate::repositories::dead_letter::note_escalated;
use crate::repositories::{
    DeadLetterRepository, JobQueueRepository, RetryInfoUpdate, RetryPolicyRepository, RunOutcome,
};

/// Whether a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Permanent,
}

/// What happened to a job after a failure was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    RetryScheduled {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    },
    DeadLettered(DeadLetterEntry),
}

/// Records worker outcomes against the job queue.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    jobs: JobQueueRepository,
    policies: RetryPolicyRepository,
    dead_letters: DeadLetterRepository,
}

impl RetryCoordinator {
    pub fn new(
        jobs: JobQueueRepository,
        policies: RetryPolicyRepository,
        dead_letters: DeadLetterRepository,
    ) -> Self {
        Self {
            jobs,
            policies,
            dead_letters,
        }
    }

    pub fn jobs(&self) -> &JobQueueRepository {
        &self.jobs
    }

    pub fn dead_letters(&self) -> &DeadLetterRepository {
        &self.dead_letters
    }

    pub fn policies(&self) -> &RetryPolicyRepository {
        &self.policies
    }

    /// Mark a running job completed.
    pub async fn record_success(&self, job_id: &str) -> Result<(), QueueError> {
        let job = self.load_running(job_id).await?;
        let outcome = RunOutcome::completed();
        JobQueueRepository::finish_running(self.jobs.connection(), job_id, outcome).await?;

        info!(job_id, phase = %job.phase, "Job completed");
        Ok(())
    }

    /// Mark a running job failed and either schedule a retry or escalate it.
    ///
    /// The retry delay comes from the phase policy evaluated with the retry
    /// count before this failure; the retry budget is the job's own
    /// `max_retries`. The job row and any dead-letter entry are written
    /// together or not at all.
    #[instrument(skip(self, error))]
    pub async fn record_failure(
        &self,
        job_id: &str,
        error: &str,
        kind: FailureKind,
    ) -> Result<FailureOutcome, QueueError> {
        let job = self.load_running(job_id).await?;
        let attempts = job.retry_count + 1;

        if kind == FailureKind::Permanent || attempts >= job.max_retries {
            let entry = self.escalate(job, attempts, JobStatus::Failed, error).await?;
            return Ok(FailureOutcome::DeadLettered(entry));
        }

        let policy = self.policies.load_or_default(job.phase).await?;
        let next_retry_at = policy
            .next_retry_at(job.retry_count, Utc::now())
            .ok_or_else(|| {
                QueueError::InvalidInput(format!(
                    "{}: retry delay {:?} is out of range",
                    job.phase,
                    policy.delay(job.retry_count)
                ))
            })?;

        let outcome = RunOutcome::failed(JobStatus::Failed, error).with_retry(RetryInfoUpdate {
            retry_count: attempts,
            max_retries: job.max_retries,
            next_retry_at: Some(next_retry_at),
        });
        JobQueueRepository::finish_running(self.jobs.connection(), job_id, outcome).await?;

        warn!(
            job_id,
            phase = %job.phase,
            retry_count = attempts,
            max_retries = job.max_retries,
            next_retry_at = %next_retry_at,
            error,
            "Job failed, retry scheduled"
        );

        Ok(FailureOutcome::RetryScheduled {
            retry_count: attempts,
            next_retry_at,
        })
    }

    /// Mark a running job timed out. Timeouts are not retried.
    pub async fn record_timeout(
        &self,
        job_id: &str,
        max_run: Duration,
    ) -> Result<DeadLetterEntry, QueueError> {
        let job = self.load_running(job_id).await?;
        let attempts = job.retry_count + 1;
        let message = format!("job exceeded maximum run time of {}s", max_run.as_secs());

        self.escalate(job, attempts, JobStatus::TimedOut, &message).await
    }

    /// Close the job as `status` with retries foreclosed and insert its
    /// dead-letter entry, in one transaction.
    async fn escalate(
        &self,
        job: JobRecord,
        attempts: i32,
        status: JobStatus,
        last_error: &str,
    ) -> Result<DeadLetterEntry, QueueError> {
        // The row still carries the message of the previous attempt, if any.
        let original_error = job
            .error_message
            .clone()
            .unwrap_or_else(|| last_error.to_string());
        let job = JobRecord {
            retry_count: attempts,
            ..job
        };
        let outcome = RunOutcome::failed(status, last_error)
            .with_retry(RetryInfoUpdate {
                retry_count: attempts,
                max_retries: job.max_retries,
                next_retry_at: None,
            })
            .not_retryable();

        let txn = self
            .jobs
            .connection()
            .begin()
            .await
            .map_err(|err| map_db_err("start escalation transaction", err))?;
        JobQueueRepository::finish_running(&txn, &job.job_id, outcome).await?;
        let entry =
            DeadLetterRepository::insert_entry(&txn, &job, &original_error, last_error).await?;
        txn.commit()
            .await
            .map_err(|err| map_db_err("commit escalation transaction", err))?;

        note_escalated(&entry);
        Ok(entry)
    }

    async fn load_running(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        let job = self.jobs.get(job_id).await?;
        if job.status != JobStatus::Running {
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        Ok(job)
    }
}

/// Background loop that requeues due retries.
pub struct RetryPoller {
    jobs: JobQueueRepository,
    config: RetryPollerConfig,
}

impl RetryPoller {
    pub fn new(jobs: JobQueueRepository, config: RetryPollerConfig) -> Self {
        Self { jobs, config }
    }

    /// Run until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            batch_size = self.config.batch_size,
            "Starting retry poller"
        );
        let tick_interval = Duration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retry poller shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.poll_once().await {
                        error!(error = ?err, "Retry poller tick failed");
                    }
                    histogram!("job_queue_retry_poll_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Retry poller stopped");
    }

    /// Requeue due retries until fewer than a full batch remain. Returns the total moved.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let mut total = 0;
        loop {
            let requeued = self.jobs.requeue_retryable(self.config.batch_size).await?;
            total += requeued.len();
            if requeued.is_empty() || (requeued.len() as u64) < self.config.batch_size {
                break;
            }
        }

        if total > 0 {
            debug!(requeued = total, "Retry poller requeued jobs");
        }
        Ok(total)
    }
}
