//! # DeadLetter Repository
//!
//! Terminal records for jobs that exhausted their retries or failed
//! permanently. Entries are independent of the job row once written.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::{info, instrument};

use crate::db::{cutoff, db_now};
use crate::error::{QueueError, is_unique_violation, map_db_err};
use crate::models::dead_letter::{ActiveModel, Column, Entity};
use crate::models::{DeadLetterEntry, DeadLetterStatus, JobRecord};

/// Repository for dead-letter database operations
#[derive(Debug, Clone)]
pub struct DeadLetterRepository {
    db: DatabaseConnection,
}

impl DeadLetterRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Record `job` as dead-lettered. A job can be escalated only once.
    pub async fn escalate(
        &self,
        job: &JobRecord,
        original_error: &str,
        last_error: &str,
    ) -> Result<DeadLetterEntry, QueueError> {
        let entry = Self::insert_entry(&self.db, job, original_error, last_error).await?;
        note_escalated(&entry);
        Ok(entry)
    }

    /// The insert behind [`escalate`](Self::escalate), on any connection and
    /// without metrics. Callers inside a transaction call [`note_escalated`]
    /// after commit.
    pub async fn insert_entry<C>(
        conn: &C,
        job: &JobRecord,
        original_error: &str,
        last_error: &str,
    ) -> Result<DeadLetterEntry, QueueError>
    where
        C: ConnectionTrait,
    {
        let now = db_now();
        let entry = ActiveModel {
            job_id: Set(job.job_id.clone()),
            scene_id: Set(job.scene_id),
            scene_title: Set(job.scene_title.clone()),
            phase: Set(job.phase),
            original_error: Set(original_error.to_string()),
            last_error: Set(last_error.to_string()),
            failure_count: Set(job.retry_count),
            status: Set(DeadLetterStatus::PendingReview),
            created_at: Set(now),
            updated_at: Set(now),
            abandoned_at: Set(None),
        };

        entry.insert(conn).await.map_err(|err| {
            if is_unique_violation(&err) {
                QueueError::Duplicate {
                    entity: "dead-letter entry",
                    id: job.job_id.clone(),
                }
            } else {
                map_db_err("insert dead-letter entry", err)
            }
        })
    }

    pub async fn find_by_job_id(&self, job_id: &str) -> Result<Option<DeadLetterEntry>, QueueError> {
        Entity::find_by_id(job_id.to_string())
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("load dead-letter entry", err))
    }

    /// Entries with `status`, newest first.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<DeadLetterEntry>, QueueError> {
        Entity::find()
            .filter(Column::Status.eq(status))
            .order_by_desc(Column::CreatedAt)
            .order_by_asc(Column::JobId)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("list dead-letter entries", err))
    }

    pub async fn count_by_status(&self, status: DeadLetterStatus) -> Result<u64, QueueError> {
        Entity::find()
            .filter(Column::Status.eq(status))
            .count(&self.db)
            .await
            .map_err(|err| map_db_err("count dead-letter entries", err))
    }

    /// Set the review status of an entry. Moving to `abandoned` stamps `abandoned_at`.
    pub async fn update_status(
        &self,
        job_id: &str,
        status: DeadLetterStatus,
    ) -> Result<(), QueueError> {
        let now = db_now();
        let mut query = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status))
            .col_expr(Column::UpdatedAt, Expr::value(now));
        if status == DeadLetterStatus::Abandoned {
            query = query.col_expr(Column::AbandonedAt, Expr::value(now));
        }

        let result = query
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("update dead-letter status", err))?;

        if result.rows_affected == 0 {
            return Err(not_found(job_id));
        }

        info!(job_id, status = %status, "Dead-letter entry updated");
        Ok(())
    }

    pub async fn mark_abandoned(&self, job_id: &str) -> Result<(), QueueError> {
        self.update_status(job_id, DeadLetterStatus::Abandoned).await
    }

    pub async fn delete(&self, job_id: &str) -> Result<(), QueueError> {
        let result = Entity::delete_by_id(job_id.to_string())
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("delete dead-letter entry", err))?;

        if result.rows_affected == 0 {
            return Err(not_found(job_id));
        }
        Ok(())
    }

    /// Abandon `pending_review` entries created before `now - older_than`.
    #[instrument(skip(self))]
    pub async fn auto_abandon(&self, older_than: Duration) -> Result<u64, QueueError> {
        let threshold = cutoff(Utc::now(), older_than)?;
        let now = db_now();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(DeadLetterStatus::Abandoned))
            .col_expr(Column::AbandonedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Status.eq(DeadLetterStatus::PendingReview))
            .filter(Column::CreatedAt.lt(threshold))
            .exec(&self.db)
            .await
            .map_err(|err| map_db_err("auto-abandon dead-letter entries", err))?;

        if result.rows_affected > 0 {
            info!(
                count = result.rows_affected,
                "Auto-abandoned stale dead-letter entries"
            );
        }
        Ok(result.rows_affected)
    }
}

fn not_found(job_id: &str) -> QueueError {
    QueueError::NotFound {
        entity: "dead-letter entry",
        id: job_id.to_string(),
    }
}

/// Count and log a committed escalation.
pub fn note_escalated(entry: &DeadLetterEntry) {
    counter!("job_queue_dead_lettered_total", "phase" => entry.phase.as_str()).increment(1);
    info!(
        job_id = %entry.job_id,
        scene_id = entry.scene_id,
        phase = %entry.phase,
        failure_count = entry.failure_count,
        "Job escalated to dead-letter queue"
    );
}
