//! Startup recovery and shutdown reconciliation tests.

mod test_utils;

use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Duration;
use media_jobs::config::RecoveryConfig;
use media_jobs::models::{JobStatus, Phase};
use media_jobs::recovery::{RecoveryReport, RecoverySweep};
use media_jobs::repositories::JobQueueRepository;
use media_jobs::repositories::job_queue::{
    INTERRUPTED_MESSAGE, ORPHANED_RUNNING_MESSAGE, STUCK_PENDING_MESSAGE,
};
use media_jobs::shutdown::{ShutdownCoordinator, ShutdownReport};
use test_utils::{JobFixture, insert_job, setup_test_db};

#[tokio::test]
async fn orphaned_running_jobs_become_retryable_failures() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let orphan = insert_job(
        &db,
        JobFixture::new(1, Phase::Thumbnail, JobStatus::Running).aged(Duration::hours(2)),
    )
    .await?;
    let fresh = insert_job(
        &db,
        JobFixture::new(2, Phase::Thumbnail, JobStatus::Running).aged(Duration::minutes(5)),
    )
    .await?;
    let pending = insert_job(
        &db,
        JobFixture::new(3, Phase::Thumbnail, JobStatus::Pending).aged(Duration::hours(2)),
    )
    .await?;

    let count = repo
        .mark_orphaned_running_as_failed(StdDuration::from_secs(3600))
        .await?;
    assert_eq!(count, 1);

    let stored = repo.get(&orphan.job_id).await?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.is_retryable);
    assert_eq!(stored.error_message.as_deref(), Some(ORPHANED_RUNNING_MESSAGE));
    assert!(stored.completed_at.is_some());
    assert!(stored.next_retry_at.is_some());
    assert_eq!(stored.retry_count, orphan.retry_count);

    assert_eq!(repo.get(&fresh.job_id).await?.status, JobStatus::Running);
    assert_eq!(repo.get(&pending.job_id).await?.status, JobStatus::Pending);

    // Eligible for the retry poller straight away.
    let due: Vec<String> = repo
        .get_retryable_jobs()
        .await?
        .into_iter()
        .map(|job| job.job_id)
        .collect();
    assert_eq!(due, vec![orphan.job_id]);
    Ok(())
}

#[tokio::test]
async fn stuck_pending_jobs_use_created_at() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let stuck = insert_job(
        &db,
        JobFixture::new(1, Phase::Metadata, JobStatus::Pending).aged(Duration::days(2)),
    )
    .await?;
    let recent = insert_job(
        &db,
        JobFixture::new(2, Phase::Metadata, JobStatus::Pending).aged(Duration::hours(1)),
    )
    .await?;

    let count = repo
        .mark_stuck_pending_jobs_as_failed(StdDuration::from_secs(86_400))
        .await?;
    assert_eq!(count, 1);

    let stored = repo.get(&stuck.job_id).await?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(STUCK_PENDING_MESSAGE));
    assert!(stored.is_retryable);
    assert_eq!(repo.get(&recent.job_id).await?.status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn recovery_sweep_reports_both_counts() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    insert_job(
        &db,
        JobFixture::new(1, Phase::Sprites, JobStatus::Running).aged(Duration::hours(3)),
    )
    .await?;
    insert_job(
        &db,
        JobFixture::new(2, Phase::Sprites, JobStatus::Pending).aged(Duration::days(3)),
    )
    .await?;
    insert_job(
        &db,
        JobFixture::new(3, Phase::Sprites, JobStatus::Pending).aged(Duration::days(3)),
    )
    .await?;

    let sweep = RecoverySweep::new(repo, RecoveryConfig::default());
    let report = sweep.run().await?;
    assert_eq!(
        report,
        RecoveryReport {
            orphaned_running: 1,
            stuck_pending: 2,
        }
    );
    assert_eq!(report.total(), 3);

    // Nothing left to reconcile on a second pass.
    assert_eq!(sweep.run().await?, RecoveryReport::default());
    Ok(())
}

#[tokio::test]
async fn reset_to_pending_preserves_timestamps_and_counters() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let mut fixture = JobFixture::new(4, Phase::Fingerprint, JobStatus::Pending)
        .aged(Duration::minutes(30));
    fixture.retry_count = 2;
    insert_job(&db, fixture).await?;

    let claimed = repo.claim(Phase::Fingerprint, 1).await?;
    let claimed = claimed.into_iter().next().expect("one job claimed");

    let reset = repo.reset_jobs_to_pending(&[claimed.job_id.clone()]).await?;
    assert_eq!(reset, 1);

    let stored = repo.get(&claimed.job_id).await?;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.started_at, claimed.started_at);
    assert_eq!(stored.created_at, claimed.created_at);
    assert_eq!(stored.retry_count, 2);
    assert!(stored.completed_at.is_none());
    Ok(())
}

#[tokio::test]
async fn reset_to_pending_ignores_jobs_that_are_not_running() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let done = insert_job(&db, JobFixture::new(1, Phase::Preview, JobStatus::Completed)).await?;

    assert_eq!(repo.reset_jobs_to_pending(&[done.job_id.clone()]).await?, 0);
    assert_eq!(repo.reset_jobs_to_pending(&[]).await?, 0);
    assert_eq!(repo.get(&done.job_id).await?.status, JobStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn drain_resets_unstarted_and_interrupts_the_rest() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = JobQueueRepository::new(db.clone());

    let unstarted = insert_job(&db, JobFixture::new(1, Phase::Metadata, JobStatus::Running)).await?;
    let in_flight = insert_job(&db, JobFixture::new(2, Phase::Metadata, JobStatus::Running)).await?;
    let pending = insert_job(&db, JobFixture::new(3, Phase::Metadata, JobStatus::Pending)).await?;

    let report = ShutdownCoordinator::new(repo.clone())
        .drain(&[unstarted.job_id.clone()])
        .await?;
    assert_eq!(
        report,
        ShutdownReport {
            reset_to_pending: 1,
            interrupted: 1,
        }
    );

    assert_eq!(repo.get(&unstarted.job_id).await?.status, JobStatus::Pending);
    assert_eq!(repo.get(&pending.job_id).await?.status, JobStatus::Pending);

    let interrupted = repo.get(&in_flight.job_id).await?;
    assert_eq!(interrupted.status, JobStatus::Failed);
    assert!(interrupted.is_retryable);
    assert_eq!(interrupted.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert!(interrupted.completed_at.is_some());
    assert!(interrupted.next_retry_at.is_some());
    Ok(())
}
