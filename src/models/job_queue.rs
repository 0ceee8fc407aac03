//! JobQueue entity model
//!
//! This module contains the SeaORM entity model for the job_queue table,
//! one unit of phase work for a scene, and the status vocabulary that drives
//! the queue state machine.

use std::fmt;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// Lifecycle status of a queued job.
///
/// `pending -> running` happens only through a claim. `running` ends in one of
/// the terminal statuses; `failed` jobs that are still retryable go back to
/// `pending` through the retry requeue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "timed_out")]
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::TimedOut => "timed_out",
        }
    }

    /// Terminal statuses always carry a `completed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued unit of work for one scene and one phase.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_queue")]
pub struct Model {
    /// Opaque job identifier (UUID string), immutable after creation
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: String,

    /// Scene being processed
    pub scene_id: i64,

    /// Scene title captured at submission time, kept for auditing after the scene is gone
    pub scene_title: String,

    /// Pipeline phase this job performs
    pub phase: Phase,

    pub status: JobStatus,

    /// Higher values are claimed first
    pub priority: i32,

    /// Advisory completion percentage (0-100), written only by the worker
    pub progress: i32,

    pub retry_count: i32,

    pub max_retries: i32,

    /// When set and in the past, a failed job is eligible for requeue
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    /// False permanently forecloses retries
    pub is_retryable: bool,

    /// Last failure detail
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Always set; initialised at submission and overwritten by every claim
    pub started_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
