//! Database migrations for the media job queue.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_090000_create_job_queue;
mod m2025_06_01_090100_create_retry_policy;
mod m2025_06_01_090200_create_dead_letter;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_090000_create_job_queue::Migration),
            Box::new(m2025_06_01_090100_create_retry_policy::Migration),
            Box::new(m2025_06_01_090200_create_dead_letter::Migration),
        ]
    }
}
