//! # Media Jobs
//!
//! Durable job queue and retry/recovery engine for scene processing phases
//! (metadata, thumbnails, sprites, animated thumbnails, fingerprints,
//! previews). A single relational database is the only coordination point:
//! workers poll and claim jobs with skip-locked transactions, failures are
//! retried with per-phase exponential backoff, exhausted jobs land in a
//! dead-letter table, and crashes or shutdowns are reconciled on the way in
//! and out.

pub mod config;
pub mod db;
pub mod dead_letter;
pub mod error;
pub mod executor;
pub mod models;
pub mod recovery;
pub mod repositories;
pub mod retry;
pub mod seeds;
pub mod shutdown;
pub mod telemetry;
pub use migration;
