//! Database seeding functionality
//!
//! Populates tables that the queue expects to find rows in when the
//! application starts.

pub mod retry_policy;

pub use retry_policy::seed_retry_policies;
