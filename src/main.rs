//! # Media Jobs Entry Point
//!
//! Maintenance CLI and daemon for the scene job queue.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use media_jobs::{
    config::{AppConfig, ConfigLoader},
    db,
    dead_letter::{DeadLetterJanitor, retry_from_dead_letter},
    migration::{Migrator, MigratorTrait},
    models::DeadLetterStatus,
    recovery::RecoverySweep,
    repositories::{DeadLetterRepository, JobQueueRepository, RetryPolicyRepository},
    executor::PhaseExecutor,
    retry::{RetryCoordinator, RetryPoller},
    seeds::seed_retry_policies,
    shutdown::ShutdownCoordinator,
    telemetry::init_tracing,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "media-jobs", version)]
#[command(about = "Job queue maintenance for scene processing phases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations and seed default retry policies
    Migrate,
    /// Fail orphaned running and stuck pending jobs so they are retried
    Recover,
    /// Move due retries back to pending, or requeue a single job
    Requeue {
        /// Requeue only this job, ignoring its retry delay
        #[arg(long)]
        job_id: Option<String>,
        /// Treat --job-id as a dead-letter entry and resubmit it
        #[arg(long, requires = "job_id")]
        from_dead_letter: bool,
    },
    /// Abandon stale dead-letter entries, or one entry by job id
    Abandon {
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Print queue statistics as JSON
    Stats,
    /// Run recovery, then the executor and background loops until ctrl-c
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_tracing(&config).context("initializing telemetry")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Migrate => migrate(&db).await,
        Command::Recover => {
            let report = RecoverySweep::new(jobs_repo(&db, &config), config.recovery.clone())
                .run()
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Requeue {
            job_id,
            from_dead_letter,
        } => requeue(&db, &config, job_id, from_dead_letter).await,
        Command::Abandon { job_id } => {
            let dead_letters = DeadLetterRepository::new(db.clone());
            match job_id {
                Some(job_id) => {
                    dead_letters.mark_abandoned(&job_id).await?;
                    println!("abandoned {job_id}");
                }
                None => {
                    let count = dead_letters
                        .auto_abandon(config.dead_letter.auto_abandon_after())
                        .await?;
                    println!("abandoned {count} entries");
                }
            }
            Ok(())
        }
        Command::Stats => stats(&db, &config).await,
        Command::Run => run(db, config).await,
    }
}

fn jobs_repo(db: &DatabaseConnection, config: &AppConfig) -> JobQueueRepository {
    JobQueueRepository::new(db.clone()).with_batch_chunk_size(config.submission.batch_chunk_size)
}

async fn migrate(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None).await.context("applying migrations")?;
    let created = seed_retry_policies(&RetryPolicyRepository::new(db.clone())).await?;
    println!("migrations applied, {created} retry policies seeded");
    Ok(())
}

async fn requeue(
    db: &DatabaseConnection,
    config: &AppConfig,
    job_id: Option<String>,
    from_dead_letter: bool,
) -> Result<()> {
    let jobs = jobs_repo(db, config);
    match (job_id, from_dead_letter) {
        (Some(job_id), true) => {
            let job = retry_from_dead_letter(
                &jobs,
                &RetryPolicyRepository::new(db.clone()),
                &DeadLetterRepository::new(db.clone()),
                &job_id,
            )
            .await?;
            println!("resubmitted {job_id} as {}", job.job_id);
        }
        (Some(job_id), false) => {
            jobs.requeue_job(&job_id).await?;
            println!("requeued {job_id}");
        }
        (None, _) => {
            let poller = RetryPoller::new(jobs, config.retry_poller.clone());
            let count = poller.poll_once().await?;
            println!("requeued {count} jobs");
        }
    }
    Ok(())
}

async fn stats(db: &DatabaseConnection, config: &AppConfig) -> Result<()> {
    let pending = jobs_repo(db, config).count_pending_by_phase().await?;
    let dead_letters = DeadLetterRepository::new(db.clone());
    let mut dead_letter_counts = serde_json::Map::new();
    for status in [
        DeadLetterStatus::PendingReview,
        DeadLetterStatus::Resolved,
        DeadLetterStatus::Abandoned,
    ] {
        let count = dead_letters.count_by_status(status).await?;
        dead_letter_counts.insert(status.to_string(), json!(count));
    }
    let policies = RetryPolicyRepository::new(db.clone()).list().await?;

    let report = json!({
        "pending_by_phase": pending,
        "dead_letter": dead_letter_counts,
        "retry_policies": policies,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(db: DatabaseConnection, config: AppConfig) -> Result<()> {
    let jobs = jobs_repo(&db, &config);

    // Workers must not start on top of unreconciled state.
    let report = RecoverySweep::new(jobs.clone(), config.recovery.clone())
        .run()
        .await
        .context("startup recovery sweep")?;
    info!(recovered = report.total(), "Startup recovery complete");

    let shutdown = CancellationToken::new();
    // No workers are linked into this binary; embedders register theirs with
    // `PhaseExecutor::with_worker` and reuse this shutdown path.
    let coordinator = RetryCoordinator::new(
        jobs.clone(),
        RetryPolicyRepository::new(db.clone()),
        DeadLetterRepository::new(db.clone()),
    );
    let executor = tokio::spawn(
        PhaseExecutor::new(coordinator, config.executor.clone()).run(shutdown.clone()),
    );
    let poller = tokio::spawn(
        RetryPoller::new(jobs.clone(), config.retry_poller.clone()).run(shutdown.clone()),
    );
    let janitor = tokio::spawn(
        DeadLetterJanitor::new(DeadLetterRepository::new(db.clone()), config.dead_letter.clone())
            .run(shutdown.clone()),
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    shutdown.cancel();

    for (name, handle) in [("retry poller", poller), ("dead-letter janitor", janitor)] {
        if let Err(err) = handle.await {
            error!(task = name, error = %err, "Background task ended abnormally");
        }
    }

    let stopped = executor.await.context("joining phase executor")?;
    ShutdownCoordinator::new(jobs)
        .finish(&stopped)
        .await
        .context("draining queue for shutdown")?;
    Ok(())
}
