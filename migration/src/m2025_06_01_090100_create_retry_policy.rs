//! Migration to create the retry_policy table.
//!
//! One row per processing phase. Rows are read-mostly and edited by
//! administrators; phases without a row fall back to the built-in default.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RetryPolicy::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RetryPolicy::Phase)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RetryPolicy::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(RetryPolicy::InitialDelaySeconds)
                            .big_integer()
                            .not_null()
                            .default(30),
                    )
                    .col(
                        ColumnDef::new(RetryPolicy::MaxDelaySeconds)
                            .big_integer()
                            .not_null()
                            .default(3600),
                    )
                    .col(
                        ColumnDef::new(RetryPolicy::BackoffFactor)
                            .double()
                            .not_null()
                            .default(2.0),
                    )
                    .col(
                        ColumnDef::new(RetryPolicy::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RetryPolicy::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RetryPolicy {
    Table,
    Phase,
    MaxRetries,
    InitialDelaySeconds,
    MaxDelaySeconds,
    BackoffFactor,
    UpdatedAt,
}
