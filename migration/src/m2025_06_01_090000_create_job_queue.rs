//! Migration to create the job_queue table.
//!
//! One row per unit of phase work for a scene. The row is the single source
//! of truth for job status; workers never write it directly.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobQueue::JobId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobQueue::SceneId).big_integer().not_null())
                    .col(
                        ColumnDef::new(JobQueue::SceneTitle)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(JobQueue::Phase).text().not_null())
                    .col(
                        ColumnDef::new(JobQueue::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(JobQueue::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobQueue::Progress)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobQueue::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobQueue::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(JobQueue::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobQueue::IsRetryable)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(JobQueue::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(JobQueue::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(JobQueue::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim path: phase + status filter, priority DESC then FIFO.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_job_queue_claim ON job_queue (phase, status, priority DESC, created_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_queue_scene_phase_status")
                    .table(JobQueue::Table)
                    .col(JobQueue::SceneId)
                    .col(JobQueue::Phase)
                    .col(JobQueue::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_queue_retry")
                    .table(JobQueue::Table)
                    .col(JobQueue::Status)
                    .col(JobQueue::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_job_queue_claim").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_job_queue_scene_phase_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_job_queue_retry").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(JobQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobQueue {
    Table,
    JobId,
    SceneId,
    SceneTitle,
    Phase,
    Status,
    Priority,
    Progress,
    RetryCount,
    MaxRetries,
    NextRetryAt,
    IsRetryable,
    ErrorMessage,
    StartedAt,
    CompletedAt,
    CreatedAt,
}
