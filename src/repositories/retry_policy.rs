//! # RetryPolicy Repository
//!
//! Per-phase retry configuration. Rows are read-mostly and edited by
//! administrators; a phase without a row uses [`DEFAULT_RETRY_CONFIG`].

use std::str::FromStr;

use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, Set};
use tracing::{debug, info, warn};

use crate::db::db_now;
use crate::error::{QueueError, map_db_err};
use crate::models::retry_policy::{ActiveModel, Column, Entity};
use crate::models::{DEFAULT_RETRY_CONFIG, Phase, PhaseRetryConfig, RetryConfig};

/// Repository for retry policy database operations
#[derive(Debug, Clone)]
pub struct RetryPolicyRepository {
    db: DatabaseConnection,
}

impl RetryPolicyRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Stored policy for a phase, if any.
    pub async fn get(&self, phase: Phase) -> Result<Option<RetryConfig>, QueueError> {
        let row = Entity::find_by_id(phase.as_str().to_string())
            .one(&self.db)
            .await
            .map_err(|err| map_db_err("load retry policy", err))?;

        Ok(row.as_ref().map(RetryConfig::from))
    }

    /// Stored policy for a phase, or [`DEFAULT_RETRY_CONFIG`] when none exists.
    pub async fn load_or_default(&self, phase: Phase) -> Result<RetryConfig, QueueError> {
        match self.get(phase).await? {
            Some(config) => Ok(config),
            None => {
                debug!(phase = %phase, "No stored retry policy, using default");
                Ok(DEFAULT_RETRY_CONFIG)
            }
        }
    }

    /// Insert or replace the policy for a phase after validating it.
    pub async fn upsert(&self, phase: Phase, config: RetryConfig) -> Result<(), QueueError> {
        config
            .validate()
            .map_err(|reason| QueueError::InvalidInput(format!("{phase}: {reason}")))?;

        let row = ActiveModel {
            phase: Set(phase.as_str().to_string()),
            max_retries: Set(config.max_retries),
            initial_delay_seconds: Set(config.initial_delay_seconds),
            max_delay_seconds: Set(config.max_delay_seconds),
            backoff_factor: Set(config.backoff_factor),
            updated_at: Set(db_now()),
        };

        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::Phase)
                    .update_columns([
                        Column::MaxRetries,
                        Column::InitialDelaySeconds,
                        Column::MaxDelaySeconds,
                        Column::BackoffFactor,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|err| map_db_err("upsert retry policy", err))?;

        info!(
            phase = %phase,
            max_retries = config.max_retries,
            initial_delay_seconds = config.initial_delay_seconds,
            max_delay_seconds = config.max_delay_seconds,
            backoff_factor = config.backoff_factor,
            "Retry policy saved"
        );
        Ok(())
    }

    /// All stored policies ordered by phase name. Rows naming an unknown phase are skipped.
    pub async fn list(&self) -> Result<Vec<PhaseRetryConfig>, QueueError> {
        let rows = Entity::find()
            .order_by_asc(Column::Phase)
            .all(&self.db)
            .await
            .map_err(|err| map_db_err("list retry policies", err))?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in &rows {
            match Phase::from_str(&row.phase) {
                Ok(phase) => policies.push(PhaseRetryConfig {
                    phase,
                    config: RetryConfig::from(row),
                }),
                Err(err) => warn!(error = %err, "Ignoring retry policy row"),
            }
        }
        Ok(policies)
    }
}
