//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations, plus fixtures that write job rows with explicit
//! timestamps so age-based behaviour can be tested without sleeping.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use media_jobs::db::to_db_time;
use media_jobs::models::{JobRecord, JobStatus, Phase, job_queue};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Shape of a job row written directly by [`insert_job`].
#[derive(Debug, Clone)]
pub struct JobFixture {
    pub scene_id: i64,
    pub phase: Phase,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl JobFixture {
    pub fn new(scene_id: i64, phase: Phase, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            scene_id,
            phase,
            status,
            priority: 0,
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            started_at: now,
        }
    }

    /// Shift both timestamps `age` into the past.
    #[allow(dead_code)]
    pub fn aged(mut self, age: Duration) -> Self {
        self.created_at = Utc::now() - age;
        self.started_at = self.created_at;
        self
    }

    #[allow(dead_code)]
    pub fn started_ago(mut self, age: Duration) -> Self {
        self.started_at = Utc::now() - age;
        self
    }

    #[allow(dead_code)]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.started_at = created_at;
        self
    }

    #[allow(dead_code)]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Inserts a job row exactly as described by the fixture.
#[allow(dead_code)]
pub async fn insert_job(db: &DatabaseConnection, fixture: JobFixture) -> Result<JobRecord> {
    let completed_at = fixture
        .status
        .is_terminal()
        .then(|| to_db_time(fixture.started_at));

    let row = job_queue::ActiveModel {
        job_id: Set(Uuid::new_v4().to_string()),
        scene_id: Set(fixture.scene_id),
        scene_title: Set(format!("Scene {}", fixture.scene_id)),
        phase: Set(fixture.phase),
        status: Set(fixture.status),
        priority: Set(fixture.priority),
        progress: Set(0),
        retry_count: Set(fixture.retry_count),
        max_retries: Set(fixture.max_retries),
        next_retry_at: Set(None),
        is_retryable: Set(true),
        error_message: Set(None),
        started_at: Set(to_db_time(fixture.started_at)),
        completed_at: Set(completed_at),
        created_at: Set(to_db_time(fixture.created_at)),
    };

    Ok(row.insert(db).await?)
}
