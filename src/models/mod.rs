//! # Data Models
//!
//! SeaORM entities for the queue tables and the enums stored in them.

pub mod dead_letter;
pub mod job_queue;
pub mod phase;
pub mod retry_policy;

pub use dead_letter::{DeadLetterStatus, Entity as DeadLetter};
pub use job_queue::{Entity as JobQueue, JobStatus};
pub use phase::Phase;
pub use retry_policy::{
    DEFAULT_RETRY_CONFIG, MAX_RETRY_DELAY_SECONDS, PhaseRetryConfig, RetryConfig,
};

/// A persisted job row.
pub type JobRecord = job_queue::Model;

/// A persisted dead-letter entry.
pub type DeadLetterEntry = dead_letter::Model;
