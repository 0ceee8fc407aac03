//! # Dead-Letter Housekeeping
//!
//! [`DeadLetterJanitor`] periodically abandons entries nobody reviewed, and
//! [`retry_from_dead_letter`] lets an operator give an entry another run.

use chrono::Utc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::DeadLetterConfig;
use crate::error::QueueError;
use crate::models::{DeadLetterStatus, JobRecord};
use crate::repositories::{DeadLetterRepository, JobQueueRepository, NewJob, RetryPolicyRepository};

/// Background loop running [`DeadLetterRepository::auto_abandon`].
pub struct DeadLetterJanitor {
    dead_letters: DeadLetterRepository,
    config: DeadLetterConfig,
}

impl DeadLetterJanitor {
    pub fn new(dead_letters: DeadLetterRepository, config: DeadLetterConfig) -> Self {
        Self {
            dead_letters,
            config,
        }
    }

    /// One sweep. Returns the number of entries abandoned.
    pub async fn sweep(&self) -> Result<u64, QueueError> {
        self.dead_letters
            .auto_abandon(self.config.auto_abandon_after())
            .await
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            auto_abandon_after_seconds = self.config.auto_abandon_after_seconds,
            "Starting dead-letter janitor"
        );
        let interval = Duration::from_secs(self.config.sweep_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Dead-letter janitor shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = ?err, "Dead-letter sweep failed");
                    }
                }
            }
        }

        info!("Dead-letter janitor stopped");
    }
}

/// Submit a fresh pending job for the entry's scene and phase and resolve the entry.
///
/// The new job uses the phase's current retry budget. Entries that are
/// already resolved are rejected; abandoned entries may be revived.
pub async fn retry_from_dead_letter(
    jobs: &JobQueueRepository,
    policies: &RetryPolicyRepository,
    dead_letters: &DeadLetterRepository,
    job_id: &str,
) -> Result<JobRecord, QueueError> {
    let entry = dead_letters
        .find_by_job_id(job_id)
        .await?
        .ok_or_else(|| QueueError::NotFound {
            entity: "dead-letter entry",
            id: job_id.to_string(),
        })?;

    if entry.status == DeadLetterStatus::Resolved {
        return Err(QueueError::InvalidInput(format!(
            "dead-letter entry '{job_id}' is already resolved"
        )));
    }

    let policy = policies.load_or_default(entry.phase).await?;
    let job = jobs
        .submit_one(
            NewJob::new(entry.scene_id, entry.scene_title.clone(), entry.phase)
                .with_max_retries(policy.max_retries),
        )
        .await?;

    dead_letters
        .update_status(job_id, DeadLetterStatus::Resolved)
        .await?;

    info!(
        dead_letter_job_id = job_id,
        job_id = %job.job_id,
        scene_id = entry.scene_id,
        phase = %entry.phase,
        age_seconds = (Utc::now() - entry.created_at.with_timezone(&Utc)).num_seconds(),
        "Dead-letter entry resubmitted"
    );
    Ok(job)
}
