//! Submission guard tests: single and batched inserts, the active-job
//! existence check, and per-phase pending counts.

mod test_utils;

use anyhow::Result;
use media_jobs::error::ErrorKind;
use media_jobs::models::{JobStatus, Phase};
use media_jobs::repositories::{JobQueueRepository, NewJob};
use test_utils::{JobFixture, insert_job, setup_test_db};

#[tokio::test]
async fn submit_one_creates_pending_job() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db);

    let job = repo
        .submit_one(NewJob::new(42, "Beach Day", Phase::Thumbnail).with_priority(5))
        .await?;

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.scene_id, 42);
    assert_eq!(job.scene_title, "Beach Day");
    assert_eq!(job.priority, 5);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert!(job.is_retryable);
    assert!(job.next_retry_at.is_none());
    assert!(job.completed_at.is_none());
    assert_eq!(job.started_at, job.created_at);

    let stored = repo.get(&job.job_id).await?;
    assert_eq!(stored, job);
    Ok(())
}

#[tokio::test]
async fn submit_rejects_negative_retry_budget() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db);

    let err = repo
        .submit_one(NewJob::new(1, "Scene", Phase::Metadata).with_max_retries(-1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    Ok(())
}

#[tokio::test]
async fn submit_batch_spans_multiple_chunks() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db).with_batch_chunk_size(2);

    let jobs: Vec<NewJob> = (1..=5)
        .map(|scene_id| NewJob::new(scene_id, format!("Scene {scene_id}"), Phase::Sprites))
        .collect();
    let submitted = repo.submit_batch(jobs).await?;
    assert_eq!(submitted.len(), 5);

    for job in &submitted {
        let stored = repo.get(&job.job_id).await?;
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.phase, Phase::Sprites);
    }

    let counts = repo.count_pending_by_phase().await?;
    assert_eq!(counts.get(&Phase::Sprites), Some(&5));
    Ok(())
}

#[tokio::test]
async fn submit_batch_with_no_jobs_is_a_no_op() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db);

    assert!(repo.submit_batch(Vec::new()).await?.is_empty());
    assert!(repo.count_pending_by_phase().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn exists_pending_or_running_ignores_finished_jobs() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    insert_job(&db, JobFixture::new(7, Phase::Fingerprint, JobStatus::Completed)).await?;
    insert_job(&db, JobFixture::new(7, Phase::Fingerprint, JobStatus::Failed)).await?;
    assert!(!repo.exists_pending_or_running(7, Phase::Fingerprint).await?);

    insert_job(&db, JobFixture::new(7, Phase::Fingerprint, JobStatus::Running)).await?;
    assert!(repo.exists_pending_or_running(7, Phase::Fingerprint).await?);
    assert!(!repo.exists_pending_or_running(7, Phase::Preview).await?);
    assert!(!repo.exists_pending_or_running(8, Phase::Fingerprint).await?);
    Ok(())
}

#[tokio::test]
async fn submit_if_absent_skips_active_scene_phase() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db);

    let first = repo
        .submit_if_absent(NewJob::new(3, "Scene", Phase::Metadata))
        .await?;
    assert!(first.is_some());

    let second = repo
        .submit_if_absent(NewJob::new(3, "Scene", Phase::Metadata))
        .await?;
    assert!(second.is_none());

    let other_phase = repo
        .submit_if_absent(NewJob::new(3, "Scene", Phase::Thumbnail))
        .await?;
    assert!(other_phase.is_some());

    assert_eq!(repo.list_by_scene(3).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn count_pending_by_phase_groups_only_pending() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    for scene_id in 1..=3 {
        insert_job(&db, JobFixture::new(scene_id, Phase::Metadata, JobStatus::Pending)).await?;
    }
    insert_job(&db, JobFixture::new(4, Phase::Thumbnail, JobStatus::Pending)).await?;
    insert_job(&db, JobFixture::new(5, Phase::Thumbnail, JobStatus::Running)).await?;
    insert_job(&db, JobFixture::new(6, Phase::Preview, JobStatus::Cancelled)).await?;

    let counts = repo.count_pending_by_phase().await?;
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[&Phase::Metadata], 3);
    assert_eq!(counts[&Phase::Thumbnail], 1);
    assert!(!counts.contains_key(&Phase::Preview));
    Ok(())
}

#[tokio::test]
async fn find_by_id_returns_none_for_unknown_job() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db);

    assert!(repo.find_by_id("no-such-job").await?.is_none());
    let err = repo.get("no-such-job").await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}
