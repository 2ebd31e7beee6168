/// Core maintenance job trait
///
/// A job is one idempotent clean-up statement (or a few) run against the
/// database on every pass. Jobs report how many rows they touched so the
/// orchestrator can log something useful.
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use iahome_worker::jobs::{JobResult, MaintenanceJob};
/// use sqlx::PgPool;
///
/// struct VacuumLog;
///
/// #[async_trait]
/// impl MaintenanceJob for VacuumLog {
///     fn name(&self) -> &str {
///         "vacuum-log"
///     }
///
///     async fn run(&self, db: &PgPool) -> JobResult<u64> {
///         let done = sqlx::query("DELETE FROM audit_log WHERE created_at < NOW() - INTERVAL '90 days'")
///             .execute(db)
///             .await?;
///         Ok(done.rows_affected())
///     }
/// }
/// ```

use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job failed: {0}")]
    Failed(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &str;

    /// Runs one pass; returns the number of rows changed
    async fn run(&self, db: &PgPool) -> JobResult<u64>;
}
