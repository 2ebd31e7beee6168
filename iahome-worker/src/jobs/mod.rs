/// Maintenance jobs
///
/// Built-in jobs:
/// - [`ExpireGrantsJob`] (`expire-grants`)
/// - [`PurgeResetTokensJob`] (`purge-reset-tokens`)

pub mod expire_grants;
pub mod job_trait;
pub mod purge_reset_tokens;

pub use expire_grants::ExpireGrantsJob;
pub use job_trait::{JobError, JobResult, MaintenanceJob};
pub use purge_reset_tokens::PurgeResetTokensJob;

use std::sync::Arc;

/// Jobs registered by default, in run order
pub fn default_jobs() -> Vec<Arc<dyn MaintenanceJob>> {
    vec![Arc::new(ExpireGrantsJob), Arc::new(PurgeResetTokensJob)]
}
