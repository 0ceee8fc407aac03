//! # Startup Recovery
//!
//! Reconciles jobs left behind by a crashed process before any worker starts
//! claiming: running jobs nobody will finish and pending jobs nobody claimed.
//! Both are failed as retryable and due immediately, so the retry poller picks
//! them up on its next tick.

use serde::Serialize;
use tracing::{info, instrument};

use crate::config::RecoveryConfig;
use crate::error::QueueError;
use crate::repositories::JobQueueRepository;

/// Counts produced by one [`RecoverySweep::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub orphaned_running: u64,
    pub stuck_pending: u64,
}

impl RecoveryReport {
    pub fn total(&self) -> u64 {
        self.orphaned_running + self.stuck_pending
    }
}

pub struct RecoverySweep {
    jobs: JobQueueRepository,
    config: RecoveryConfig,
}

impl RecoverySweep {
    pub fn new(jobs: JobQueueRepository, config: RecoveryConfig) -> Self {
        Self { jobs, config }
    }

    /// Run both reconciliations. Errors propagate; the caller should not
    /// start workers when this fails.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RecoveryReport, QueueError> {
        let orphaned_running = self
            .jobs
            .mark_orphaned_running_as_failed(self.config.orphaned_running_after())
            .await?;
        let stuck_pending = self
            .jobs
            .mark_stuck_pending_jobs_as_failed(self.config.stuck_pending_after())
            .await?;

        let report = RecoveryReport {
            orphaned_running,
            stuck_pending,
        };
        info!(
            orphaned_running = report.orphaned_running,
            stuck_pending = report.stuck_pending,
            "Startup recovery sweep finished"
        );
        Ok(report)
    }
}
