//! # Phase Executor
//!
//! Drives registered [`PhaseWorker`]s: claims batches of pending jobs per
//! phase, runs each job under a semaphore permit and a run-time limit, and
//! reports the outcome through the [`RetryCoordinator`].
//!
//! On shutdown, jobs that were claimed but never got a permit are returned
//! in [`ExecutorShutdown::unstarted`]; in-flight jobs get a grace period and
//! are then aborted and listed in [`ExecutorShutdown::aborted`]. The caller
//! hands both to [`ShutdownCoordinator::finish`](crate::shutdown::ShutdownCoordinator::finish).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, Id, JoinError, JoinSet};
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::{ErrorKind, QueueError};
use crate::models::{JobRecord, Phase};
use crate::repositories::JobQueueRepository;
use crate::retry::{FailureKind, FailureOutcome, RetryCoordinator};
use crate::telemetry::job_span;

/// Failure reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Worth retrying with backoff (I/O hiccup, busy transcoder, ...)
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help (corrupt file, unsupported codec, ...)
    #[error("{0}")]
    Permanent(String),
}

/// Performs the actual media work for one phase.
#[async_trait]
pub trait PhaseWorker: Send + Sync {
    fn phase(&self) -> Phase;

    async fn process(&self, job: &JobRecord, progress: ProgressReporter)
    -> Result<(), WorkerError>;
}

/// Handle a worker uses to publish advisory progress for its job.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    jobs: JobQueueRepository,
    job_id: String,
}

impl ProgressReporter {
    pub fn new(jobs: JobQueueRepository, job_id: impl Into<String>) -> Self {
        Self {
            jobs,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Store `percent` (clamped to 0..=100).
    pub async fn report(&self, percent: i32) -> Result<(), QueueError> {
        self.jobs.update_progress(&self.job_id, percent).await
    }
}

/// How a single execution ended, as recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    RetryScheduled,
    DeadLettered,
    TimedOut,
    /// The job left `running` underneath the worker (reset or interrupted);
    /// the result was discarded.
    Superseded,
    /// The store rejected the outcome write; the job is still `running`.
    RecordFailed,
}

/// What the executor left behind when it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorShutdown {
    /// Claimed jobs that never started running
    pub unstarted: Vec<String>,
    /// In-flight jobs aborted after the grace period
    pub aborted: Vec<String>,
}

/// Spawned job tasks keyed back to the job they run.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<JobOutcome>,
    jobs: HashMap<Id, String>,
}

impl InFlight {
    fn spawn<F>(&mut self, job_id: String, task: F)
    where
        F: Future<Output = JobOutcome> + Send + 'static,
    {
        let handle = self.tasks.spawn(task);
        self.jobs.insert(handle.id(), job_id);
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn abort_all(&mut self) {
        self.tasks.abort_all();
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next_with_id() {
            self.settle(result);
        }
    }

    /// Wait for the next task. `None` once the set is empty.
    async fn join_next(&mut self) -> Option<Option<String>> {
        let result = self.tasks.join_next_with_id().await?;
        Some(self.settle(result))
    }

    /// Forget a finished task. Returns its job id if it was cancelled.
    fn settle(&mut self, result: Result<(Id, JobOutcome), JoinError>) -> Option<String> {
        match result {
            Ok((id, _)) => {
                self.jobs.remove(&id);
                None
            }
            Err(err) => {
                let job_id = self.jobs.remove(&err.id());
                if err.is_cancelled() {
                    debug!(job_id = ?job_id, "Job task cancelled");
                    job_id
                } else {
                    error!(job_id = ?job_id, error = %err, "Job task panicked");
                    None
                }
            }
        }
    }
}

pub struct PhaseExecutor {
    coordinator: RetryCoordinator,
    workers: BTreeMap<Phase, Arc<dyn PhaseWorker>>,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
}

impl PhaseExecutor {
    pub fn new(coordinator: RetryCoordinator, config: ExecutorConfig) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            coordinator,
            workers: BTreeMap::new(),
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Register the worker for its phase, replacing any earlier one.
    pub fn with_worker(mut self, worker: Arc<dyn PhaseWorker>) -> Self {
        let phase = worker.phase();
        if self.workers.insert(phase, worker).is_some() {
            warn!(phase = %phase, "Replacing previously registered worker");
        }
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Claim from every served phase once and run the claimed jobs to
    /// completion. Returns the number of jobs executed.
    #[instrument(skip(self), fields(claim_batch = self.config.claim_batch))]
    pub async fn process_available(&self) -> Result<usize, QueueError> {
        let mut tasks = InFlight::default();
        let never = CancellationToken::new();

        let unstarted = self.claim_round(&mut tasks, &never).await?;
        if !unstarted.is_empty() {
            self.coordinator
                .jobs()
                .reset_jobs_to_pending(&unstarted)
                .await?;
        }

        let mut executed = 0;
        while tasks.join_next().await.is_some() {
            executed += 1;
        }
        Ok(executed)
    }

    /// Claim and run jobs every tick until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> ExecutorShutdown {
        info!(
            concurrency = self.config.concurrency,
            claim_batch = self.config.claim_batch,
            phases = ?self.workers.keys().collect::<Vec<_>>(),
            "Starting phase executor"
        );
        let tick = Duration::from_millis(self.config.tick_ms);
        let mut tasks = InFlight::default();
        let mut unstarted = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Phase executor shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    tasks.reap();
                    match self.claim_round(&mut tasks, &shutdown).await {
                        Ok(left) => unstarted.extend(left),
                        Err(err) => error!(error = ?err, "Claim round failed"),
                    }
                }
            }
        }

        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        let drained = timeout(grace, async { while tasks.join_next().await.is_some() {} }).await;

        let mut aborted = Vec::new();
        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_seconds = self.config.shutdown_grace_seconds,
                "Aborting in-flight jobs after grace period"
            );
            tasks.abort_all();
            while let Some(cancelled) = tasks.join_next().await {
                aborted.extend(cancelled);
            }
        }

        info!(
            unstarted = unstarted.len(),
            aborted = aborted.len(),
            "Phase executor stopped"
        );
        ExecutorShutdown { unstarted, aborted }
    }

    /// Claim up to the free capacity for each served phase and spawn the
    /// jobs. Returns claimed ids left unstarted because shutdown fired.
    async fn claim_round(
        &self,
        tasks: &mut InFlight,
        shutdown: &CancellationToken,
    ) -> Result<Vec<String>, QueueError> {
        let served = self.config.effective_phases();

        for (phase, worker) in &self.workers {
            if !served.contains(phase) {
                continue;
            }
            let available = self.semaphore.available_permits() as u64;
            if available == 0 {
                break;
            }

            let jobs = self
                .coordinator
                .jobs()
                .claim(*phase, self.config.claim_batch.min(available))
                .await?;
            if jobs.is_empty() {
                continue;
            }
            debug!(phase = %phase, claimed = jobs.len(), "Dispatching claimed jobs");

            let mut queue = jobs.into_iter();
            while let Some(job) = queue.next() {
                let permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    permit = self.semaphore.clone().acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    let mut left = vec![job.job_id];
                    left.extend(queue.map(|job| job.job_id));
                    return Ok(left);
                };

                let coordinator = self.coordinator.clone();
                let worker = Arc::clone(worker);
                let max_run = Duration::from_secs(self.config.max_run_seconds);
                let span = job_span(&job);
                let job_id = job.job_id.clone();
                tasks.spawn(
                    job_id,
                    async move {
                        let _permit = permit;
                        execute_job(coordinator, worker, job, max_run).await
                    }
                    .instrument(span),
                );
            }
        }

        Ok(Vec::new())
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn execute_job(
    coordinator: RetryCoordinator,
    worker: Arc<dyn PhaseWorker>,
    job: JobRecord,
    max_run: Duration,
) -> JobOutcome {
    let job_id = job.job_id.clone();
    let reporter = ProgressReporter::new(coordinator.jobs().clone(), job_id.clone());
    let started = std::time::Instant::now();

    // Separate task so a panicking worker surfaces as a JoinError.
    let handle = tokio::spawn(
        async move { worker.process(&job, reporter).await }.in_current_span(),
    );
    let _guard = AbortOnDrop(handle.abort_handle());

    let recorded = match timeout(max_run, handle).await {
        Ok(Ok(Ok(()))) => coordinator
            .record_success(&job_id)
            .await
            .map(|_| JobOutcome::Completed),
        Ok(Ok(Err(WorkerError::Transient(message)))) => coordinator
            .record_failure(&job_id, &message, FailureKind::Retryable)
            .await
            .map(outcome_of),
        Ok(Ok(Err(WorkerError::Permanent(message)))) => coordinator
            .record_failure(&job_id, &message, FailureKind::Permanent)
            .await
            .map(outcome_of),
        Ok(Err(join_err)) => coordinator
            .record_failure(
                &job_id,
                &format!("worker task failed: {join_err}"),
                FailureKind::Retryable,
            )
            .await
            .map(outcome_of),
        Err(_) => {
            warn!(max_run_seconds = max_run.as_secs(), "Job exceeded run-time limit");
            coordinator
                .record_timeout(&job_id, max_run)
                .await
                .map(|_| JobOutcome::TimedOut)
        }
    };

    match recorded {
        Ok(outcome) => {
            debug!(
                ?outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job execution finished"
            );
            outcome
        }
        Err(err) => unrecorded_outcome(err),
    }
}

fn unrecorded_outcome(err: QueueError) -> JobOutcome {
    if err.kind() == ErrorKind::InvalidState || err.is_not_found() {
        warn!(error = %err, "Job changed state during execution, result discarded");
        return JobOutcome::Superseded;
    }
    // Outcome writes are all-or-nothing, so the row is still running.
    error!(error = ?err, "Failed to record job outcome");
    JobOutcome::RecordFailed
}

fn outcome_of(outcome: FailureOutcome) -> JobOutcome {
    match outcome {
        FailureOutcome::RetryScheduled { .. } => JobOutcome::RetryScheduled,
        FailureOutcome::DeadLettered(_) => JobOutcome::DeadLettered,
    }
}
