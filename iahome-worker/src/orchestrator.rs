/// Maintenance orchestrator
///
/// Runs every registered job once per interval until shutdown.
///
/// # Architecture
///
/// ```text
/// Orchestrator
///   ├─> tick (immediately, then every `interval_secs`)
///   ├─> ExpireGrantsJob
///   ├─> PurgeResetTokensJob
///   └─> wait for next tick or cancellation
/// ```
///
/// A failing job is logged and does not stop the others or later passes.
///
/// # Example
///
/// ```no_run
/// use iahome_worker::orchestrator::MaintenanceOrchestrator;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> anyhow::Result<()> {
/// let orchestrator = MaintenanceOrchestrator::new(pool);
/// let shutdown = orchestrator.shutdown_token();
///
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     shutdown.cancel();
/// });
///
/// orchestrator.run().await?;
/// # Ok(())
/// # }
/// ```

use crate::jobs::{default_jobs, MaintenanceJob};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pause between passes in seconds
    pub interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            interval_secs: crate::config::DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Outcome of one job in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job: String,

    /// Rows changed, or the error message
    pub outcome: Result<u64, String>,
}

pub struct MaintenanceOrchestrator {
    db: PgPool,
    jobs: Vec<Arc<dyn MaintenanceJob>>,
    config: OrchestratorConfig,
    shutdown_token: CancellationToken,
}

impl MaintenanceOrchestrator {
    /// Creates an orchestrator with the default jobs and interval
    pub fn new(db: PgPool) -> Self {
        Self::with_config(db, OrchestratorConfig::default())
    }

    pub fn with_config(db: PgPool, config: OrchestratorConfig) -> Self {
        MaintenanceOrchestrator {
            db,
            jobs: default_jobs(),
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Orchestrator with no jobs registered
    pub fn empty(db: PgPool, config: OrchestratorConfig) -> Self {
        MaintenanceOrchestrator {
            db,
            jobs: Vec::new(),
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn MaintenanceJob>) {
        tracing::info!(job = %job.name(), "Registering maintenance job");
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Gets shutdown token
    ///
    /// Cancelling it stops the loop after the current pass.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs every job once, in registration order
    pub async fn run_once(&self) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(self.jobs.len());

        for job in &self.jobs {
            let started = Instant::now();
            let outcome = job.run(&self.db).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                Ok(0) => tracing::debug!(job = %job.name(), elapsed_ms, "Nothing to do"),
                Ok(rows) => tracing::info!(job = %job.name(), rows, elapsed_ms, "Maintenance job done"),
                Err(e) => tracing::error!(job = %job.name(), error = %e, "Maintenance job failed"),
            }

            reports.push(JobReport {
                job: job.name().to_string(),
                outcome: outcome.map_err(|e| e.to_string()),
            });
        }

        reports
    }

    /// Runs passes until the shutdown token is cancelled
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            interval_secs = self.config.interval_secs,
            jobs = ?self.job_names(),
            "Maintenance orchestrator starting"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        tracing::info!("Maintenance orchestrator shut down");
        Ok(())
    }
}
