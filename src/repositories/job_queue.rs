//! # Job Queue Repository
//!
//! Persistence for [`JobRecord`] rows: submission, the atomic claim, lifecycle
//! updates, cancellation, retry requeue, and the bulk transitions used by the
//! recovery sweep and the shutdown coordinator.
//!
//! The database is the only coordination point. `claim` and
//! `requeue_retryable` are the only operations that take row locks; every
//! other transition is a single guarded `UPDATE`. [`JobQueueRepository::finish_running`]
//! accepts any connection so callers can pair it with other writes in one
//! transaction.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{cutoff, db_now, to_db_time};
use crate::error::{QueueError, is_unique_violation, map_db_err};
use crate::models::job_queue::{ActiveModel, Column, Entity, Model};
use crate::models::{DEFAULT_RETRY_CONFIG, JobRecord, JobStatus, Phase};

/// Default number of rows per multi-row INSERT.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 100;

pub const ORPHANED_RUNNING_MESSAGE: &str =
    "job orphaned: worker did not report completion before restart";
pub const STUCK_PENDING_MESSAGE: &str = "job stuck in pending: never claimed by a worker";
pub const INTERRUPTED_MESSAGE: &str = "job interrupted by shutdown";

const NO_TIME: Option<DateTimeWithTimeZone> = None;

/// A job to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub scene_id: i64,
    pub scene_title: String,
    pub phase: Phase,
    pub priority: i32,
    pub max_retries: i32,
}

impl NewJob {
    pub fn new(scene_id: i64, scene_title: impl Into<String>, phase: Phase) -> Self {
        Self {
            scene_id,
            scene_title: scene_title.into(),
            phase,
            priority: 0,
            max_retries: DEFAULT_RETRY_CONFIG.max_retries,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.max_retries < 0 {
            return Err(QueueError::InvalidInput(format!(
                "max_retries must not be negative, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }

    fn into_record(self, now: DateTime<Utc>) -> Model {
        let now = to_db_time(now);
        Model {
            job_id: Uuid::new_v4().to_string(),
            scene_id: self.scene_id,
            scene_title: self.scene_title,
            phase: self.phase,
            status: JobStatus::Pending,
            priority: self.priority,
            progress: 0,
            retry_count: 0,
            max_retries: self.max_retries,
            next_retry_at: None,
            is_retryable: true,
            error_message: None,
            started_at: now,
            completed_at: None,
            created_at: now,
        }
    }
}

/// Status patch applied by [`JobQueueRepository::update_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub error_message: Option<String>,
    /// Defaults to now when the status is terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            error_message: None,
            completed_at: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Retry bookkeeping patch applied by [`JobQueueRepository::update_retry_info`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryInfoUpdate {
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Final write for a running job, applied by [`JobQueueRepository::finish_running`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub progress: Option<i32>,
    pub retry: Option<RetryInfoUpdate>,
    /// Clears `is_retryable` and `next_retry_at`
    pub not_retryable: bool,
}

impl RunOutcome {
    /// `completed` at 100% progress.
    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            error_message: None,
            progress: Some(100),
            retry: None,
            not_retryable: false,
        }
    }

    pub fn failed(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: Some(message.into()),
            progress: None,
            retry: None,
            not_retryable: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryInfoUpdate) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn not_retryable(mut self) -> Self {
        self.not_retryable = true;
        self
    }
}

/// Repository for job queue database operations
#[derive(Debug, Clone)]
pub struct JobQueueRepository {
    db: DatabaseConnection,
    batch_chunk_size: usize,
}

impl JobQueueRepository {
    /// Create a new JobQueueRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
        }
    }

    /// Override the number of rows per multi-row INSERT.
    pub fn with_batch_chunk_size(mut self, chunk_size: usize) -> Self {
        self.batch_chunk_size = chunk_size.max(1);
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Insert one pending job.
    pub async fn submit_one(&self, job: NewJob) -> Result<JobRecord, QueueError> {
        job.validate()?;
        let record = job.into_record(Utc::now());

        let inserted = to_active(&record).insert(&self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                QueueError::Duplicate {
                    entity: "job",
                    id: record.job_id.clone(),
                }
            } else {
                map_db_err("insert job", err)
            }
        })?;

        counter!("job_queue_submitted_total", "phase" => inserted.phase.as_str()).increment(1);
        info!(
            job_id = %inserted.job_id,
            scene_id = inserted.scene_id,
            phase = %inserted.phase,
            priority = inserted.priority,
            "Job submitted"
        );

        Ok(inserted)
    }

    /// Insert many pending jobs in one transaction, chunked into multi-row INSERTs.
    pub async fn submit_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>, QueueError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        for job in &jobs {
            job.validate()?;
        }

        let now = Utc::now();
        let records: Vec<Model> = jobs.into_iter().map(|job| job.into_record(now)).collect();

        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("start submission transaction", err))?;

        for chunk in records.chunks(self.batch_chunk_size) {
            Entity::insert_many(chunk.iter().map(to_active))
                .exec_without_returning(&txn)
                .await
                .map_err(|err| map_db_err("insert job batch", err))?;
        }

        txn.commit()
            .await
            .map_err(|err| map_db_err("commit submission transaction", err))?;

        let mut per_phase: BTreeMap<Phase, u64> = BTreeMap::new();
        for record in &records {
            *per_phase.entry(record.phase).or_default() += 1;
        }
        for (phase, count) in &per_phase {
            counter!("job_queue_submitted_total", "phase" => phase.as_str()).increment(*count);
        }
        info!(count = records.len(), "Job batch submitted");

        Ok(records)
    }

    /// True when a job for `(scene_id, phase)` is pending or running.
    ///
    /// Not atomic with a following insert; two submitters may both see `false`.
    pub async fn exists_pending_or_running(
        &self,
        scene_id: i64,
        phase: Phase,
    ) -> Result<bool, QueueError> {
        let count = Entity::find()
            .filter(Column::SceneId.eq(scene_id))
            .filter(Column::Phase.eq(phase))
            .filter(Column::Status.is_in([JobStatus::Pending, JobStatus::Running]))
            .count(&self.db)
            .await
            .map_err(|err| map_db_err("check for active job", err))?;

        Ok(count > 0)
    }

    /// Submit unless an active job already exists for the same scene and phase.
    pub async fn submit_if_absent(&self, job: NewJob) -> Result<Option<JobRecord>, QueueError> {
        if self
            .exists_pending_or_running(job.scene_id, job.phase)
            .await?
        {
            debug!(
                scene_id = job.scene_id,
                phase = %job.phase,
                "Active job already queued, skipping submission"
            );
            return Ok(None);
        }

        self.submit_one(job).await.map(Some)
    }

    /// Number of pending jobs per phase. Phases with none are absent.
    pub async fn count_pending_by_phase(&self) -> Result<BTreeMap<Phase, u64>, QueueError> {
        let rows: Vec<(String, i64)> = Entity::find()
            .select_only()
            .column(Column::Phase)
            .column_as(Expr::col(Column::JobId).count(), "pending")
            .filter(Column::Status.eq(JobStatus::Pending))
            .group_by(Column::Phase)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("count pending jobs", err))?;

        let mut counts = BTreeMap::new();
        for (phase, count) in rows {
            match Phase::from_str(&phase) {
                Ok(phase) => {
                    counts.insert(phase, count.max(0) as u64);
                }
                Err(err) => warn!(error = %err, "Skipping pending jobs with unknown phase"),
            }
        }

        Ok(counts)
    }

    pub async fn find_by_id(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        Entity::find_by_id(job_id.to_string())
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("load job", err))
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing job is an error.
    pub async fn get(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        self.find_by_id(job_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(job_id))
    }

    /// All jobs of a scene, oldest first.
    pub async fn list_by_scene(&self, scene_id: i64) -> Result<Vec<JobRecord>, QueueError> {
        Entity::find()
            .filter(Column::SceneId.eq(scene_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::JobId)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("list jobs for scene", err))
    }

    /// Atomically move up to `limit` pending jobs of `phase` to running.
    ///
    /// Selection is `priority DESC, created_at ASC` with `FOR UPDATE SKIP
    /// LOCKED`, so concurrent claimers never receive the same job. The update
    /// re-checks `status = pending`; only rows this call transitioned are
    /// returned, in claim order.
    #[instrument(skip(self), fields(phase = %phase))]
    pub async fn claim(&self, phase: Phase, limit: u64) -> Result<Vec<JobRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let timer = std::time::Instant::now();
        let now = db_now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("start claim transaction", err))?;

        let ids: Vec<String> = Entity::find()
            .select_only()
            .column(Column::JobId)
            .filter(Column::Phase.eq(phase))
            .filter(Column::Status.eq(JobStatus::Pending))
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::JobId)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .into_tuple()
            .all(&txn)
            .await
            .map_err(|err| map_db_err("select claimable jobs", err))?;

        if ids.is_empty() {
            txn.commit()
                .await
                .map_err(|err| map_db_err("commit claim transaction", err))?;
            return Ok(Vec::new());
        }

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Running))
            .col_expr(Column::StartedAt, Expr::value(now))
            .filter(Column::JobId.is_in(ids.clone()))
            .filter(Column::Status.eq(JobStatus::Pending))
            .exec(&txn)
            .await
            .map_err(|err| map_db_err("mark claimed jobs running", err))?;

        let claimed = Entity::find()
            .filter(Column::JobId.is_in(ids.clone()))
            .filter(Column::Status.eq(JobStatus::Running))
            .filter(Column::StartedAt.eq(now))
            .all(&txn)
            .await
            .map_err(|err| map_db_err("read back claimed jobs", err))?;

        txn.commit()
            .await
            .map_err(|err| map_db_err("commit claim transaction", err))?;

        let position: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        let mut claimed = claimed;
        claimed.sort_by_key(|job| position.get(job.job_id.as_str()).copied());

        counter!("job_queue_claimed_total", "phase" => phase.as_str())
            .increment(claimed.len() as u64);
        histogram!("job_queue_claim_duration_ms", "phase" => phase.as_str())
            .record(timer.elapsed().as_secs_f64() * 1000.0);

        if !claimed.is_empty() {
            debug!(claimed = claimed.len(), requested = limit, "Claimed jobs");
        }

        Ok(claimed)
    }

    /// Apply a status patch. Terminal statuses are stamped with `completed_at`.
    pub async fn update_status(
        &self,
        job_id: &str,
        update: JobStatusUpdate,
    ) -> Result<(), QueueError> {
        let completed_at = match update.completed_at {
            Some(at) => Some(to_db_time(at)),
            None if update.status.is_terminal() => Some(db_now()),
            None => None,
        };

        let mut query = Entity::update_many()
            .col_expr(Column::Status, Expr::value(update.status))
            .col_expr(Column::ErrorMessage, Expr::value(update.error_message));
        if let Some(completed_at) = completed_at {
            query = query.col_expr(Column::CompletedAt, Expr::value(completed_at));
        }

        let result = query
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("update job status", err))?;

        if result.rows_affected == 0 {
            return Err(QueueError::job_not_found(job_id));
        }

        debug!(job_id, status = %update.status, "Job status updated");
        Ok(())
    }

    /// Apply `outcome` to a job that is still running, in one `UPDATE`.
    ///
    /// Returns `InvalidState` when the job already left `running` and
    /// `NotFound` when it does not exist; nothing is written in either case.
    pub async fn finish_running<C>(
        conn: &C,
        job_id: &str,
        outcome: RunOutcome,
    ) -> Result<(), QueueError>
    where
        C: ConnectionTrait,
    {
        let mut query = Entity::update_many()
            .col_expr(Column::Status, Expr::value(outcome.status))
            .col_expr(Column::ErrorMessage, Expr::value(outcome.error_message))
            .col_expr(Column::CompletedAt, Expr::value(db_now()));
        if let Some(progress) = outcome.progress {
            query = query.col_expr(Column::Progress, Expr::value(progress.clamp(0, 100)));
        }
        if let Some(retry) = outcome.retry {
            query = query
                .col_expr(Column::RetryCount, Expr::value(retry.retry_count))
                .col_expr(Column::MaxRetries, Expr::value(retry.max_retries))
                .col_expr(
                    Column::NextRetryAt,
                    Expr::value(retry.next_retry_at.map(to_db_time)),
                );
        }
        if outcome.not_retryable {
            query = query
                .col_expr(Column::IsRetryable, Expr::value(false))
                .col_expr(Column::NextRetryAt, Expr::value(NO_TIME));
        }

        let result = query
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running))
            .exec(conn)
            .await
            .map_err(|err| map_db_err("record job outcome", err))?;

        if result.rows_affected == 0 {
            let job = Entity::find_by_id(job_id.to_string())
                .one(conn)
                .await
                .map_err(|err| map_db_err("load job", err))?
                .ok_or_else(|| QueueError::job_not_found(job_id))?;
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                expected: JobStatus::Running,
                actual: job.status,
            });
        }

        debug!(job_id, status = %outcome.status, "Job outcome recorded");
        Ok(())
    }

    /// Record advisory progress, clamped to 0..=100.
    pub async fn update_progress(&self, job_id: &str, percent: i32) -> Result<(), QueueError> {
        let percent = percent.clamp(0, 100);
        let result = Entity::update_many()
            .col_expr(Column::Progress, Expr::value(percent))
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("update job progress", err))?;

        if result.rows_affected == 0 {
            return Err(QueueError::job_not_found(job_id));
        }
        Ok(())
    }

    pub async fn update_retry_info(
        &self,
        job_id: &str,
        update: RetryInfoUpdate,
    ) -> Result<(), QueueError> {
        let result = Entity::update_many()
            .col_expr(Column::RetryCount, Expr::value(update.retry_count))
            .col_expr(Column::MaxRetries, Expr::value(update.max_retries))
            .col_expr(
                Column::NextRetryAt,
                Expr::value(update.next_retry_at.map(to_db_time)),
            )
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("update job retry info", err))?;

        if result.rows_affected == 0 {
            return Err(QueueError::job_not_found(job_id));
        }
        Ok(())
    }

    pub async fn increment_retry_count(&self, job_id: &str) -> Result<(), QueueError> {
        let result = Entity::update_many()
            .col_expr(Column::RetryCount, Expr::col(Column::RetryCount).add(1))
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("increment job retry count", err))?;

        if result.rows_affected == 0 {
            return Err(QueueError::job_not_found(job_id));
        }
        Ok(())
    }

    /// Permanently foreclose retries (`next_retry_at` is cleared with it).
    pub async fn mark_not_retryable(&self, job_id: &str) -> Result<(), QueueError> {
        let result = Entity::update_many()
            .col_expr(Column::IsRetryable, Expr::value(false))
            .col_expr(Column::NextRetryAt, Expr::value(NO_TIME))
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("mark job not retryable", err))?;

        if result.rows_affected == 0 {
            return Err(QueueError::job_not_found(job_id));
        }
        Ok(())
    }

    /// Failed, retryable jobs whose `next_retry_at` has passed, earliest first.
    pub async fn get_retryable_jobs(&self) -> Result<Vec<JobRecord>, QueueError> {
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Failed))
            .filter(Column::IsRetryable.eq(true))
            .filter(Column::NextRetryAt.is_not_null())
            .filter(Column::NextRetryAt.lte(db_now()))
            .order_by_asc(Column::NextRetryAt)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("load retryable jobs", err))
    }

    /// Move up to `limit` due retryable jobs from failed back to pending.
    ///
    /// Retry counters are kept; `next_retry_at`, `completed_at` and progress
    /// are cleared. Returns the requeued job ids, earliest due first.
    #[instrument(skip(self))]
    pub async fn requeue_retryable(&self, limit: u64) -> Result<Vec<String>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = db_now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| map_db_err("start requeue transaction", err))?;

        let due: Vec<(String, String)> = Entity::find()
            .select_only()
            .column(Column::JobId)
            .column(Column::Phase)
            .filter(Column::Status.eq(JobStatus::Failed))
            .filter(Column::IsRetryable.eq(true))
            .filter(Column::NextRetryAt.is_not_null())
            .filter(Column::NextRetryAt.lte(now))
            .order_by_asc(Column::NextRetryAt)
            .order_by_asc(Column::JobId)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .into_tuple()
            .all(&txn)
            .await
            .map_err(|err| map_db_err("select due retries", err))?;

        if due.is_empty() {
            txn.commit()
                .await
                .map_err(|err| map_db_err("commit requeue transaction", err))?;
            return Ok(Vec::new());
        }

        let ids: Vec<String> = due.iter().map(|(id, _)| id.clone()).collect();
        let result = requeue_update()
            .filter(Column::JobId.is_in(ids.clone()))
            .filter(Column::Status.eq(JobStatus::Failed))
            .filter(Column::IsRetryable.eq(true))
            .exec(&txn)
            .await
            .map_err(|err| map_db_err("requeue due retries", err))?;

        txn.commit()
            .await
            .map_err(|err| map_db_err("commit requeue transaction", err))?;

        for (_, phase) in &due {
            counter!("job_queue_retry_requeued_total", "phase" => phase.clone()).increment(1);
        }
        info!(requeued = result.rows_affected, "Requeued due retries");

        Ok(ids)
    }

    /// Requeue one failed, retryable job immediately, ignoring `next_retry_at`.
    pub async fn requeue_job(&self, job_id: &str) -> Result<(), QueueError> {
        let job = self.get(job_id).await?;
        let result = requeue_update()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Failed))
            .filter(Column::IsRetryable.eq(true))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("requeue job", err))?;

        if result.rows_affected == 0 {
            let job = self.get(job_id).await?;
            if job.status == JobStatus::Failed {
                return Err(QueueError::InvalidInput(format!(
                    "job '{job_id}' is not retryable"
                )));
            }
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                expected: JobStatus::Failed,
                actual: job.status,
            });
        }

        counter!("job_queue_retry_requeued_total", "phase" => job.phase.as_str()).increment(1);
        info!(job_id, phase = %job.phase, "Job requeued");
        Ok(())
    }

    /// Cancel every pending job of a scene. Running jobs are left alone.
    pub async fn cancel_pending_jobs_for_scene(&self, scene_id: i64) -> Result<u64, QueueError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Cancelled))
            .col_expr(Column::CompletedAt, Expr::value(db_now()))
            .filter(Column::SceneId.eq(scene_id))
            .filter(Column::Status.eq(JobStatus::Pending))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("cancel pending jobs for scene", err))?;

        if result.rows_affected > 0 {
            info!(
                scene_id,
                cancelled = result.rows_affected,
                "Cancelled pending jobs for scene"
            );
        }
        Ok(result.rows_affected)
    }

    /// Cancel one pending job.
    ///
    /// Returns `NotFound` when the job does not exist and `InvalidState` when
    /// it is no longer pending (a claim won the race, or it was already
    /// cancelled).
    pub async fn cancel_pending_job(&self, job_id: &str) -> Result<(), QueueError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Cancelled))
            .col_expr(Column::CompletedAt, Expr::value(db_now()))
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Pending))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("cancel pending job", err))?;

        if result.rows_affected == 0 {
            let job = self.get(job_id).await?;
            return Err(QueueError::InvalidState {
                job_id: job_id.to_string(),
                expected: JobStatus::Pending,
                actual: job.status,
            });
        }

        info!(job_id, "Cancelled pending job");
        Ok(())
    }

    /// Fail running jobs whose `started_at` is older than `older_than`.
    #[instrument(skip(self))]
    pub async fn mark_orphaned_running_as_failed(
        &self,
        older_than: Duration,
    ) -> Result<u64, QueueError> {
        let threshold = cutoff(Utc::now(), older_than)?;
        let result = fail_for_retry(ORPHANED_RUNNING_MESSAGE)
            .filter(Column::Status.eq(JobStatus::Running))
            .filter(Column::StartedAt.lt(threshold))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("fail orphaned running jobs", err))?;

        if result.rows_affected > 0 {
            counter!("job_queue_recovered_total", "reason" => "orphaned_running")
                .increment(result.rows_affected);
            warn!(
                count = result.rows_affected,
                "Marked orphaned running jobs as failed"
            );
        }
        Ok(result.rows_affected)
    }

    /// Fail pending jobs whose `created_at` is older than `older_than`.
    #[instrument(skip(self))]
    pub async fn mark_stuck_pending_jobs_as_failed(
        &self,
        older_than: Duration,
    ) -> Result<u64, QueueError> {
        let threshold = cutoff(Utc::now(), older_than)?;
        let result = fail_for_retry(STUCK_PENDING_MESSAGE)
            .filter(Column::Status.eq(JobStatus::Pending))
            .filter(Column::CreatedAt.lt(threshold))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("fail stuck pending jobs", err))?;

        if result.rows_affected > 0 {
            counter!("job_queue_recovered_total", "reason" => "stuck_pending")
                .increment(result.rows_affected);
            warn!(
                count = result.rows_affected,
                "Marked stuck pending jobs as failed"
            );
        }
        Ok(result.rows_affected)
    }

    /// Return claimed-but-unstarted jobs to pending.
    ///
    /// Only rows that are still running move; timestamps and retry counters
    /// are left as they are.
    pub async fn reset_jobs_to_pending(&self, job_ids: &[String]) -> Result<u64, QueueError> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Pending))
            .filter(Column::JobId.is_in(job_ids.iter().cloned()))
            .filter(Column::Status.eq(JobStatus::Running))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("reset claimed jobs to pending", err))?;

        info!(count = result.rows_affected, "Reset unstarted jobs to pending");
        Ok(result.rows_affected)
    }

    /// Fail the listed jobs as interrupted if they are still running.
    pub async fn mark_jobs_interrupted(&self, job_ids: &[String]) -> Result<u64, QueueError> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let result = fail_for_retry(INTERRUPTED_MESSAGE)
            .filter(Column::JobId.is_in(job_ids.iter().cloned()))
            .filter(Column::Status.eq(JobStatus::Running))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("mark jobs interrupted", err))?;

        if result.rows_affected > 0 {
            warn!(count = result.rows_affected, "Marked jobs as interrupted");
        }
        Ok(result.rows_affected)
    }

    /// Fail every running job as interrupted, eligible for immediate retry.
    pub async fn mark_running_as_interrupted(&self) -> Result<u64, QueueError> {
        let result = fail_for_retry(INTERRUPTED_MESSAGE)
            .filter(Column::Status.eq(JobStatus::Running))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("mark running jobs interrupted", err))?;

        if result.rows_affected > 0 {
            warn!(
                count = result.rows_affected,
                "Marked running jobs as interrupted"
            );
        }
        Ok(result.rows_affected)
    }
}

/// Builds the insert values for a record; every column is set explicitly.
fn to_active(record: &Model) -> ActiveModel {
    ActiveModel {
        job_id: Set(record.job_id.clone()),
        scene_id: Set(record.scene_id),
        scene_title: Set(record.scene_title.clone()),
        phase: Set(record.phase),
        status: Set(record.status),
        priority: Set(record.priority),
        progress: Set(record.progress),
        retry_count: Set(record.retry_count),
        max_retries: Set(record.max_retries),
        next_retry_at: Set(record.next_retry_at),
        is_retryable: Set(record.is_retryable),
        error_message: Set(record.error_message.clone()),
        started_at: Set(record.started_at),
        completed_at: Set(record.completed_at),
        created_at: Set(record.created_at),
    }
}

/// `failed`, retryable, due now, with the given message.
fn fail_for_retry(message: &str) -> sea_orm::UpdateMany<Entity> {
    let now = db_now();
    Entity::update_many()
        .col_expr(Column::Status, Expr::value(JobStatus::Failed))
        .col_expr(Column::IsRetryable, Expr::value(true))
        .col_expr(Column::ErrorMessage, Expr::value(message.to_string()))
        .col_expr(Column::CompletedAt, Expr::value(now))
        .col_expr(Column::NextRetryAt, Expr::value(now))
}

fn requeue_update() -> sea_orm::UpdateMany<Entity> {
    Entity::update_many()
        .col_expr(Column::Status, Expr::value(JobStatus::Pending))
        .col_expr(Column::Progress, Expr::value(0))
        .col_expr(Column::NextRetryAt, Expr::value(NO_TIME))
        .col_expr(Column::CompletedAt, Expr::value(NO_TIME))
}
