pub mod tasks;

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

/// Runs scheduled messages next to the relay loop. Jobs never touch cursors or the cache.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: usize,
}

impl Scheduler {
    /// Create a scheduler with no jobs
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner, jobs: 0 })
    }

    /// Register `task` under a six-field cron expression (seconds first).
    pub async fn add_cron_job<F>(&mut self, cron_expr: &str, name: &str, task: F) -> Result<()>
    where
        F: Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_async(cron_expr, move |uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running scheduled job '{}' ({})", name, uuid);
                fut.await;
            })
        })
        .with_context(|| format!("Invalid cron expression for '{}': {}", name, cron_expr))?;

        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;
        self.jobs += 1;

        info!("Scheduled job '{}' with cron: {}", name, cron_expr);
        Ok(())
    }

    /// Number of jobs registered so far
    pub fn job_count(&self) -> usize {
        self.jobs
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started with {} job(s)", self.job_count());
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
