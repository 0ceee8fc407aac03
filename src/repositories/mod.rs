//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! queue tables. Each repository owns a cloned connection handle and maps
//! store errors into [`QueueError`](crate::error::QueueError).

pub mod dead_letter;
pub mod job_queue;
pub mod retry_policy;

pub use dead_letter::DeadLetterRepository;
pub use job_queue::{
    JobQueueRepository, JobStatusUpdate, NewJob, RetryInfoUpdate, RunOutcome,
};
pub use retry_policy::RetryPolicyRepository;
