//! Periodic hygiene: time out stalled jobs, purge old terminal jobs.
//!
//! Two independent sweeps on explicit tickers. Both select affected jobs
//! before mutating them so exact ids are known for event publication and
//! lock cleanup; a failure on one job is logged and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use newslens_common::{DeepSearchConfig, JobStatus};

use crate::lifecycle::JobLifecycleManager;
use crate::publisher::ProgressPublisher;
use crate::traits::{EvidenceRepo, JobRepo};

const TERMINAL_STATUSES: [JobStatus; 4] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Timeout,
    JobStatus::Cancelled,
];

pub struct Sweeper {
    config: DeepSearchConfig,
    lifecycle: Arc<JobLifecycleManager>,
    jobs: Arc<dyn JobRepo>,
    evidence: Arc<dyn EvidenceRepo>,
    publisher: Arc<ProgressPublisher>,
}

impl Sweeper {
    pub fn new(
        config: DeepSearchConfig,
        lifecycle: Arc<JobLifecycleManager>,
        jobs: Arc<dyn JobRepo>,
        evidence: Arc<dyn EvidenceRepo>,
        publisher: Arc<ProgressPublisher>,
    ) -> Self {
        Self {
            config,
            lifecycle,
            jobs,
            evidence,
            publisher,
        }
    }

    /// Time out jobs stuck in Pending/InProgress past the configured limit.
    /// Returns how many jobs were transitioned.
    pub async fn run_timeout_sweep(&self) -> Result<usize> {
        let horizon = Utc::now() - chrono::Duration::minutes(self.config.timeout_minutes);
        let stalled = self
            .jobs
            .find_by_status_created_before(&[JobStatus::Pending, JobStatus::InProgress], horizon)
            .await?;

        let mut timed_out = 0;
        for job in stalled {
            match self.lifecycle.timeout_job(&job.id).await {
                Ok(true) => timed_out += 1,
                Ok(false) => {} // raced to terminal between select and update
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Timeout sweep failed for job, continuing");
                }
            }
        }

        if timed_out > 0 {
            info!(timed_out, "Timeout sweep complete");
        }
        Ok(timed_out)
    }

    /// Purge terminal jobs past the retention window. Evidence goes first —
    /// it must never outlive its owning job — then the jobs, then their
    /// event channels and completion locks.
    pub async fn run_cleanup_sweep(&self) -> Result<usize> {
        let horizon = Utc::now() - chrono::Duration::days(self.config.cleanup_days);
        let expired = self
            .jobs
            .find_by_status_created_before(&TERMINAL_STATUSES, horizon)
            .await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = expired.iter().map(|j| j.id.clone()).collect();
        self.evidence.delete_by_job_ids(&ids).await?;
        self.jobs.delete_by_ids(&ids).await?;
        for id in &ids {
            self.publisher.remove(id);
        }
        self.lifecycle.drop_locks(&ids);

        info!(purged = ids.len(), "Retention sweep complete");
        Ok(ids.len())
    }

    /// Run both sweeps on their configured intervals until the task is
    /// aborted. The first tick of each interval fires immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let timeout_every = Duration::from_millis(self.config.sweep_interval_ms);
        let cleanup_every = Duration::from_secs(self.config.cleanup_interval_hours * 3600);
        tokio::spawn(async move {
            let mut timeout_tick = tokio::time::interval(timeout_every);
            let mut cleanup_tick = tokio::time::interval(cleanup_every);
            loop {
                tokio::select! {
                    _ = timeout_tick.tick() => {
                        if let Err(e) = self.run_timeout_sweep().await {
                            warn!(error = %e, "Timeout sweep failed");
                        }
                    }
                    _ = cleanup_tick.tick() => {
                        if let Err(e) = self.run_cleanup_sweep().await {
                            warn!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }
        })
    }
}
