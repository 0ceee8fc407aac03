//! Migration to create the dead_letter table.
//!
//! Terminal records for jobs that exhausted their retries or failed
//! permanently. Entries carry no foreign key back to job_queue and outlive
//! the job row they were escalated from.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeadLetter::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeadLetter::JobId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeadLetter::SceneId).big_integer().not_null())
                    .col(
                        ColumnDef::new(DeadLetter::SceneTitle)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(DeadLetter::Phase).text().not_null())
                    .col(ColumnDef::new(DeadLetter::OriginalError).text().not_null())
                    .col(ColumnDef::new(DeadLetter::LastError).text().not_null())
                    .col(
                        ColumnDef::new(DeadLetter::FailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DeadLetter::Status)
                            .text()
                            .not_null()
                            .default("pending_review"),
                    )
                    .col(
                        ColumnDef::new(DeadLetter::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DeadLetter::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DeadLetter::AbandonedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_status_created")
                    .table(DeadLetter::Table)
                    .col(DeadLetter::Status)
                    .col(DeadLetter::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_dead_letter_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DeadLetter::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeadLetter {
    Table,
    JobId,
    SceneId,
    SceneTitle,
    Phase,
    OriginalError,
    LastError,
    FailureCount,
    Status,
    CreatedAt,
    UpdatedAt,
    AbandonedAt,
}
