//! Lifecycle updater, cancellation and retry requeue tests.

mod test_utils;

use anyhow::Result;
use chrono::{Duration, Utc};
use media_jobs::error::{ErrorKind, QueueError};
use media_jobs::models::{JobStatus, Phase};
use media_jobs::repositories::{JobQueueRepository, JobStatusUpdate, RetryInfoUpdate};
use test_utils::{JobFixture, insert_job, setup_test_db};

#[tokio::test]
async fn terminal_status_stamps_completed_at() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());
    let job = insert_job(&db, JobFixture::new(1, Phase::Metadata, JobStatus::Running)).await?;

    repo.update_status(
        &job.job_id,
        JobStatusUpdate::new(JobStatus::Failed).with_error("ffprobe exited with 1"),
    )
    .await?;

    let stored = repo.get(&job.job_id).await?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("ffprobe exited with 1"));
    assert!(stored.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn explicit_completed_at_is_kept() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());
    let job = insert_job(&db, JobFixture::new(1, Phase::Metadata, JobStatus::Running)).await?;
    let at = Utc::now() - Duration::minutes(3);

    repo.update_status(
        &job.job_id,
        JobStatusUpdate {
            status: JobStatus::Completed,
            error_message: None,
            completed_at: Some(at),
        },
    )
    .await?;

    let stored = repo.get(&job.job_id).await?;
    let completed_at = stored.completed_at.expect("completed_at set");
    assert_eq!(completed_at.timestamp(), at.timestamp());
    Ok(())
}

#[tokio::test]
async fn update_status_on_missing_job_is_not_found() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db);

    let err = repo
        .update_status("missing", JobStatusUpdate::new(JobStatus::Completed))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn progress_is_clamped() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());
    let job = insert_job(&db, JobFixture::new(1, Phase::Sprites, JobStatus::Running)).await?;

    repo.update_progress(&job.job_id, 150).await?;
    assert_eq!(repo.get(&job.job_id).await?.progress, 100);

    repo.update_progress(&job.job_id, -5).await?;
    let stored = repo.get(&job.job_id).await?;
    assert_eq!(stored.progress, 0);
    assert_eq!(stored.status, JobStatus::Running);
    Ok(())
}

#[tokio::test]
async fn retry_bookkeeping_round_trip() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());
    let job = insert_job(&db, JobFixture::new(1, Phase::Sprites, JobStatus::Failed)).await?;
    let next = Utc::now() + Duration::minutes(5);

    repo.update_retry_info(
        &job.job_id,
        RetryInfoUpdate {
            retry_count: 2,
            max_retries: 5,
            next_retry_at: Some(next),
        },
    )
    .await?;
    repo.increment_retry_count(&job.job_id).await?;

    let stored = repo.get(&job.job_id).await?;
    assert_eq!(stored.retry_count, 3);
    assert_eq!(stored.max_retries, 5);
    assert_eq!(
        stored.next_retry_at.map(|at| at.timestamp()),
        Some(next.timestamp())
    );

    repo.mark_not_retryable(&job.job_id).await?;
    let stored = repo.get(&job.job_id).await?;
    assert!(!stored.is_retryable);
    assert!(stored.next_retry_at.is_none());
    Ok(())
}

#[tokio::test]
async fn retryable_jobs_are_due_failed_and_ordered() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let later = insert_job(&db, JobFixture::new(1, Phase::Preview, JobStatus::Failed)).await?;
    let earlier = insert_job(&db, JobFixture::new(2, Phase::Preview, JobStatus::Failed)).await?;
    let future = insert_job(&db, JobFixture::new(3, Phase::Preview, JobStatus::Failed)).await?;
    let blocked = insert_job(&db, JobFixture::new(4, Phase::Preview, JobStatus::Failed)).await?;

    let schedule = [
        (&later, Utc::now() - Duration::seconds(10)),
        (&earlier, Utc::now() - Duration::seconds(60)),
        (&future, Utc::now() + Duration::hours(1)),
        (&blocked, Utc::now() - Duration::seconds(60)),
    ];
    for (job, at) in schedule {
        repo.update_retry_info(
            &job.job_id,
            RetryInfoUpdate {
                retry_count: 1,
                max_retries: 3,
                next_retry_at: Some(at),
            },
        )
        .await?;
    }
    repo.mark_not_retryable(&blocked.job_id).await?;

    let due: Vec<String> = repo
        .get_retryable_jobs()
        .await?
        .into_iter()
        .map(|job| job.job_id)
        .collect();
    assert_eq!(due, vec![earlier.job_id, later.job_id]);
    Ok(())
}

#[tokio::test]
async fn requeue_retryable_moves_due_jobs_back_to_pending() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let due = insert_job(&db, JobFixture::new(1, Phase::Thumbnail, JobStatus::Failed)).await?;
    let not_due = insert_job(&db, JobFixture::new(2, Phase::Thumbnail, JobStatus::Failed)).await?;
    for (job, at) in [
        (&due, Utc::now() - Duration::seconds(1)),
        (&not_due, Utc::now() + Duration::minutes(10)),
    ] {
        repo.update_retry_info(
            &job.job_id,
            RetryInfoUpdate {
                retry_count: 1,
                max_retries: 3,
                next_retry_at: Some(at),
            },
        )
        .await?;
    }

    let requeued = repo.requeue_retryable(10).await?;
    assert_eq!(requeued, vec![due.job_id.clone()]);

    let stored = repo.get(&due.job_id).await?;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.next_retry_at.is_none());
    assert!(stored.completed_at.is_none());
    assert_eq!(repo.get(&not_due.job_id).await?.status, JobStatus::Failed);

    assert!(repo.requeue_retryable(10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn requeue_job_checks_state() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let failed = insert_job(&db, JobFixture::new(1, Phase::Metadata, JobStatus::Failed)).await?;
    repo.requeue_job(&failed.job_id).await?;
    assert_eq!(repo.get(&failed.job_id).await?.status, JobStatus::Pending);

    let running = insert_job(&db, JobFixture::new(2, Phase::Metadata, JobStatus::Running)).await?;
    let err = repo.requeue_job(&running.job_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let exhausted = insert_job(&db, JobFixture::new(3, Phase::Metadata, JobStatus::Failed)).await?;
    repo.mark_not_retryable(&exhausted.job_id).await?;
    let err = repo.requeue_job(&exhausted.job_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert!(repo.requeue_job("missing").await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn cancel_pending_job_is_state_gated() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let pending = insert_job(&db, JobFixture::new(1, Phase::Sprites, JobStatus::Pending)).await?;
    repo.cancel_pending_job(&pending.job_id).await?;
    let stored = repo.get(&pending.job_id).await?;
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.completed_at.is_some());

    // Second cancel reports the state it found.
    match repo.cancel_pending_job(&pending.job_id).await {
        Err(QueueError::InvalidState {
            expected, actual, ..
        }) => {
            assert_eq!(expected, JobStatus::Pending);
            assert_eq!(actual, JobStatus::Cancelled);
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }

    let running = insert_job(&db, JobFixture::new(1, Phase::Preview, JobStatus::Running)).await?;
    let err = repo.cancel_pending_job(&running.job_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(repo.get(&running.job_id).await?.status, JobStatus::Running);

    let err = repo.cancel_pending_job("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn cancel_for_scene_only_touches_pending_jobs_of_that_scene() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    insert_job(&db, JobFixture::new(7, Phase::Metadata, JobStatus::Pending)).await?;
    insert_job(&db, JobFixture::new(7, Phase::Thumbnail, JobStatus::Pending)).await?;
    let running = insert_job(&db, JobFixture::new(7, Phase::Sprites, JobStatus::Running)).await?;
    let other_scene = insert_job(&db, JobFixture::new(8, Phase::Metadata, JobStatus::Pending)).await?;

    assert_eq!(repo.cancel_pending_jobs_for_scene(7).await?, 2);
    assert_eq!(repo.cancel_pending_jobs_for_scene(7).await?, 0);

    assert_eq!(repo.get(&running.job_id).await?.status, JobStatus::Running);
    assert_eq!(repo.get(&other_scene.job_id).await?.status, JobStatus::Pending);
    Ok(())
}
