//! DeadLetter entity model
//!
//! Terminal record for a job whose retries are exhausted or which failed
//! permanently. Created once at escalation, then resolved by an operator or
//! auto-abandoned after an age threshold.

use std::fmt;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// Review status of a dead-letter entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    #[sea_orm(string_value = "pending_review")]
    PendingReview,
    #[sea_orm(string_value = "resolved")]
    Resolved,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
}

impl DeadLetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterStatus::PendingReview => "pending_review",
            DeadLetterStatus::Resolved => "resolved",
            DeadLetterStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for DeadLetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter")]
pub struct Model {
    /// Identifier of the escalated job; one entry per job
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: String,

    pub scene_id: i64,

    pub scene_title: String,

    pub phase: Phase,

    #[sea_orm(column_type = "Text")]
    pub original_error: String,

    #[sea_orm(column_type = "Text")]
    pub last_error: String,

    /// Number of failed attempts at escalation time
    pub failure_count: i32,

    pub status: DeadLetterStatus,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub abandoned_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
