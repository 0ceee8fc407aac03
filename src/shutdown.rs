//! # Shutdown Coordination
//!
//! Leaves the queue consistent when the process stops: jobs that were
//! claimed but never handed to a worker go back to `pending` untouched, and
//! jobs whose worker was aborted are failed as interrupted so they are
//! retried right away after restart.
//!
//! [`ShutdownCoordinator::finish`] only touches the jobs an executor reports;
//! running jobs owned by other processes sharing the database are left
//! alone. [`ShutdownCoordinator::drain`] interrupts every running job and
//! suits a deployment where this process is the only worker.

use serde::Serialize;
use tracing::info;

use crate::error::QueueError;
use crate::executor::ExecutorShutdown;
use crate::repositories::JobQueueRepository;

/// Counts produced by one [`ShutdownCoordinator::drain`] or
/// [`ShutdownCoordinator::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub reset_to_pending: u64,
    pub interrupted: u64,
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    jobs: JobQueueRepository,
}

impl ShutdownCoordinator {
    pub fn new(jobs: JobQueueRepository) -> Self {
        Self { jobs }
    }

    /// Reset `unstarted_ids` to pending, then mark every remaining running job
    /// interrupted. The order matters: reset rows must not be swept up as
    /// interrupted.
    pub async fn drain(&self, unstarted_ids: &[String]) -> Result<ShutdownReport, QueueError> {
        let reset_to_pending = self.jobs.reset_jobs_to_pending(unstarted_ids).await?;
        let interrupted = self.jobs.mark_running_as_interrupted().await?;
        Ok(report(reset_to_pending, interrupted))
    }

    /// Reset the executor's unstarted jobs to pending and mark the jobs it
    /// aborted interrupted. No other row is touched.
    pub async fn finish(&self, stopped: &ExecutorShutdown) -> Result<ShutdownReport, QueueError> {
        let reset_to_pending = self.jobs.reset_jobs_to_pending(&stopped.unstarted).await?;
        let interrupted = self.jobs.mark_jobs_interrupted(&stopped.aborted).await?;
        Ok(report(reset_to_pending, interrupted))
    }
}

fn report(reset_to_pending: u64, interrupted: u64) -> ShutdownReport {
    info!(
        reset_to_pending,
        interrupted, "Queue drained for shutdown"
    );
    ShutdownReport {
        reset_to_pending,
        interrupted,
    }
}
