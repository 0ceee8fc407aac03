//! Retry policy seeding
//!
//! Writes [`DEFAULT_RETRY_CONFIG`] for every phase that has no stored policy,
//! so administrators have a row to edit. Existing rows are never touched.

use anyhow::Result;

use crate::models::{DEFAULT_RETRY_CONFIG, Phase};
use crate::repositories::RetryPolicyRepository;

/// Seeds the retry_policy table. Returns the number of rows created.
pub async fn seed_retry_policies(repo: &RetryPolicyRepository) -> Result<usize> {
    let mut created = 0;

    for phase in Phase::all() {
        match repo.get(phase).await? {
            Some(_) => {
                log::info!("Retry policy for '{}' already exists, skipping", phase);
            }
            None => {
                log::info!("Creating default retry policy for '{}'", phase);
                repo.upsert(phase, DEFAULT_RETRY_CONFIG).await?;
                created += 1;
            }
        }
    }

    log::info!("Retry policy seeding completed ({} created)", created);
    Ok(created)
}
