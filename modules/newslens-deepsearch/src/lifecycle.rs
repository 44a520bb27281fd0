//! Job state machine and orchestration.
//!
//! `PENDING → IN_PROGRESS → {COMPLETED, FAILED, TIMEOUT, CANCELLED}`; the
//! terminal states are absorbing. All terminal transitions go through the
//! per-job completion lock, and the `callback_received` flag gives the
//! async callback path first-write-wins against local completion. Late
//! strategy output for a job that already went terminal is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use newslens_common::{
    DeepSearchConfig, DeepSearchError, Job, JobEvent, JobPage, JobResult, JobStatus,
    JobStatusView, RawEvidence,
};

use crate::collector::{distribution_of, EvidenceCollector};
use crate::dispatch::{DispatchOutcome, JobProgressSink, StrategyDispatcher};
use crate::publisher::ProgressPublisher;
use crate::traits::{CrawlRequest, EvidenceRepo, JobRepo};

pub struct JobLifecycleManager {
    config: DeepSearchConfig,
    jobs: Arc<dyn JobRepo>,
    evidence: Arc<dyn EvidenceRepo>,
    publisher: Arc<ProgressPublisher>,
    dispatcher: Arc<StrategyDispatcher>,
    collector: Arc<EvidenceCollector>,
    /// One async mutex per job serializes terminal writes (local completion
    /// vs callback vs cancel vs timeout).
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobLifecycleManager {
    pub fn new(
        config: DeepSearchConfig,
        jobs: Arc<dyn JobRepo>,
        evidence: Arc<dyn EvidenceRepo>,
        publisher: Arc<ProgressPublisher>,
        dispatcher: Arc<StrategyDispatcher>,
        collector: Arc<EvidenceCollector>,
    ) -> Self {
        Self {
            config,
            jobs,
            evidence,
            publisher,
            dispatcher,
            collector,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a deep-search job. Validates that a crawl capability exists,
    /// creates the job in Pending, publishes the initial events, and hands
    /// execution to a spawned task. Returns immediately.
    pub async fn start(
        self: &Arc<Self>,
        topic: &str,
        base_url: Option<String>,
    ) -> Result<Job, DeepSearchError> {
        if !self.dispatcher.has_capability() {
            return Err(DeepSearchError::NoCrawlCapability);
        }

        let job = Job::new(topic, base_url);
        self.jobs.create(job.clone()).await?;
        info!(job_id = %job.id, topic, "Deep-search job created");

        self.publisher.publish(
            &job.id,
            JobEvent::Status {
                status: JobStatus::Pending,
                message: format!("Deep search queued for \"{topic}\""),
            },
        );
        self.publisher.publish(
            &job.id,
            JobEvent::Progress {
                percent: 0,
                message: "Job created".to_string(),
            },
        );

        let manager = Arc::clone(self);
        let spawned = job.clone();
        tokio::spawn(async move {
            manager.execute_job(spawned).await;
        });

        Ok(job)
    }

    /// The spawned execution path for one job.
    async fn execute_job(self: Arc<Self>, job: Job) {
        // Transition to InProgress, unless a cancel won the race already.
        {
            let lock = self.completion_lock(&job.id);
            let _guard = lock.lock().await;
            let mut current = match self.jobs.find(&job.id).await {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to load job for execution");
                    return;
                }
            };
            if current.status.is_terminal() {
                debug!(job_id = %job.id, "Job went terminal before execution started");
                return;
            }
            current.status = JobStatus::InProgress;
            if let Err(e) = self.jobs.save(&current).await {
                warn!(job_id = %job.id, error = %e, "Failed to persist InProgress transition");
                return;
            }
        }
        self.publisher.publish(
            &job.id,
            JobEvent::Status {
                status: JobStatus::InProgress,
                message: "Crawl started".to_string(),
            },
        );
        self.publisher.publish(
            &job.id,
            JobEvent::Progress {
                percent: 10,
                message: "Starting crawl".to_string(),
            },
        );

        let request = CrawlRequest {
            topic: job.topic.clone(),
            base_url: job.base_url.clone(),
        };
        let sink = JobProgressSink::new(job.id.clone(), Arc::clone(&self.publisher));

        match self.dispatcher.execute(&job.id, &request, &sink).await {
            DispatchOutcome::Completed(raw) => {
                if let Err(e) = self.apply_local_completion(&job.id, raw).await {
                    warn!(job_id = %job.id, error = %e, "Failed to apply local completion");
                }
            }
            DispatchOutcome::AwaitingCallback => {
                // Job stays InProgress until the callback (or the timeout
                // sweep) resolves it.
                self.publisher.publish(
                    &job.id,
                    JobEvent::Progress {
                        percent: 50,
                        message: "Waiting for external workflow results".to_string(),
                    },
                );
            }
            DispatchOutcome::Failed(message) => {
                if let Err(e) = self.fail_job(&job.id, &message).await {
                    warn!(job_id = %job.id, error = %e, "Failed to record job failure");
                }
            }
        }
    }

    /// Apply evidence produced by the local (integrated) crawl path.
    /// Dropped silently if the job already went terminal or the callback
    /// path completed it first.
    async fn apply_local_completion(
        &self,
        job_id: &str,
        raw: Vec<RawEvidence>,
    ) -> anyhow::Result<()> {
        let lock = self.completion_lock(job_id);
        let _guard = lock.lock().await;

        let job = match self.jobs.find(job_id).await? {
            Some(job) => job,
            None => return Ok(()),
        };
        if job.status.is_terminal() || job.callback_received {
            debug!(job_id, status = %job.status, "Dropping late local crawl result");
            return Ok(());
        }

        self.collector.record(job_id, raw).await?;
        self.finalize_completed(job_id).await
    }

    /// Entry point for an inbound workflow callback. Verifies the shared
    /// secret before touching any job state, then hands the payload to
    /// [`complete_from_callback`](Self::complete_from_callback).
    pub async fn ingest_callback(
        &self,
        payload: workflow_client::CallbackPayload,
        presented_token: Option<&str>,
    ) -> Result<Job, DeepSearchError> {
        if !workflow_client::verify_callback_token(&self.config.callback_token, presented_token) {
            warn!(job_id = %payload.job_id, "Callback rejected, invalid token");
            return Err(DeepSearchError::InvalidCallbackToken);
        }
        let success = payload.is_success();
        let workflow_client::CallbackPayload {
            job_id,
            evidence,
            message,
            ..
        } = payload;
        let evidence = evidence.into_iter().map(Into::into).collect();
        self.complete_from_callback(&job_id, success, message, evidence)
            .await
    }

    /// Report results from the external workflow callback.
    ///
    /// First write wins: once `callback_received` is set, further callbacks
    /// return the stored job unchanged. A callback for a job that already
    /// went terminal (cancelled, timed out) is discarded.
    pub async fn complete_from_callback(
        &self,
        job_id: &str,
        success: bool,
        message: Option<String>,
        evidence: Vec<RawEvidence>,
    ) -> Result<Job, DeepSearchError> {
        let lock = self.completion_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| DeepSearchError::JobNotFound(job_id.to_string()))?;

        if job.callback_received {
            debug!(job_id, "Duplicate workflow callback ignored");
            return Ok(job);
        }
        if job.status.is_terminal() {
            debug!(job_id, status = %job.status, "Callback for terminal job discarded");
            return Ok(job);
        }

        // Set the guard atomically with the completion write: both happen
        // under the per-job lock, and the guard is rolled back if the
        // write fails. A consumed guard without a terminal status would
        // swallow the workflow's retry and strand the job until timeout.
        job.callback_received = true;
        self.jobs.save(&job).await?;

        let outcome = if success {
            match self.collector.record(job_id, evidence).await {
                Ok(_) => self.finalize_completed(job_id).await,
                Err(e) => Err(e),
            }
        } else {
            let message =
                message.unwrap_or_else(|| "External workflow reported failure".to_string());
            self.fail_locked(job_id, &message).await
        };

        if let Err(e) = outcome {
            warn!(job_id, error = %e, "Callback completion failed, releasing guard for retry");
            if let Some(mut stored) = self.jobs.find(job_id).await? {
                stored.callback_received = false;
                self.jobs.save(&stored).await?;
            }
            return Err(e.into());
        }

        self.jobs
            .find(job_id)
            .await?
            .ok_or_else(|| DeepSearchError::JobNotFound(job_id.to_string()))
    }

    /// Cancel a job. Idempotent: already-terminal jobs are returned as-is.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, DeepSearchError> {
        let lock = self.completion_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| DeepSearchError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        job.status = JobStatus::Cancelled;
        job.error_message = Some("Job cancelled by user".to_string());
        job.completed_at = Some(Utc::now());
        self.jobs.save(&job).await?;
        info!(job_id, "Job cancelled");

        self.publisher.publish(
            job_id,
            JobEvent::Status {
                status: JobStatus::Cancelled,
                message: "Job cancelled by user".to_string(),
            },
        );
        self.publish_complete(&job).await?;
        Ok(job)
    }

    /// Transition a stalled job to Timeout. Called only by the sweep.
    /// Returns false if the job raced to a terminal state first.
    pub async fn timeout_job(&self, job_id: &str) -> Result<bool, DeepSearchError> {
        let lock = self.completion_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = match self.jobs.find(job_id).await? {
            Some(job) => job,
            None => return Ok(false),
        };
        if job.status.is_terminal() {
            return Ok(false);
        }

        let message = format!(
            "Deep search timed out after {} minutes",
            self.config.timeout_minutes
        );
        job.status = JobStatus::Timeout;
        job.error_message = Some(message.clone());
        job.completed_at = Some(Utc::now());
        self.jobs.save(&job).await?;
        warn!(job_id, "Job timed out");

        self.publisher
            .publish(job_id, JobEvent::Error { message: message.clone() });
        self.publisher.publish(
            job_id,
            JobEvent::Status {
                status: JobStatus::Timeout,
                message,
            },
        );
        self.publish_complete(&job).await?;
        Ok(true)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobStatusView, DeepSearchError> {
        let job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| DeepSearchError::JobNotFound(job_id.to_string()))?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn get_result(&self, job_id: &str) -> Result<JobResult, DeepSearchError> {
        let job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| DeepSearchError::JobNotFound(job_id.to_string()))?;
        self.build_result(&job).await.map_err(Into::into)
    }

    pub async fn list_jobs(
        &self,
        page: usize,
        size: usize,
        status_filter: Option<JobStatus>,
    ) -> Result<JobPage, DeepSearchError> {
        let (jobs, total) = self.jobs.list(page, size, status_filter).await?;
        Ok(JobPage {
            jobs,
            page,
            size,
            total,
        })
    }

    /// Subscribe to a job's live event stream.
    pub fn subscribe(&self, job_id: &str) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.publisher.subscribe(job_id)
    }

    // --- internal ---

    fn completion_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Release per-job locks for purged jobs. Called by the cleanup sweep.
    pub(crate) fn drop_locks(&self, job_ids: &[String]) {
        let mut locks = self.locks.lock().unwrap();
        for id in job_ids {
            locks.remove(id);
        }
    }

    /// Terminal transition to Completed. Caller holds the completion lock
    /// and has already persisted evidence.
    async fn finalize_completed(&self, job_id: &str) -> anyhow::Result<()> {
        let mut job = match self.jobs.find(job_id).await? {
            Some(job) => job,
            None => return Ok(()),
        };

        let message = if job.evidence_count == 0 {
            "Deep search completed with no evidence found".to_string()
        } else {
            format!(
                "Deep search completed with {} evidence items",
                job.evidence_count
            )
        };
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        self.jobs.save(&job).await?;
        info!(job_id, evidence_count = job.evidence_count, "Job completed");

        self.publisher.publish(
            job_id,
            JobEvent::Progress {
                percent: 100,
                message: message.clone(),
            },
        );
        self.publisher.publish(
            job_id,
            JobEvent::Status {
                status: JobStatus::Completed,
                message,
            },
        );
        self.publish_complete(&job).await?;
        Ok(())
    }

    /// Terminal transition to Failed, taking the completion lock first.
    async fn fail_job(&self, job_id: &str, message: &str) -> anyhow::Result<()> {
        let lock = self.completion_lock(job_id);
        let _guard = lock.lock().await;
        self.fail_locked(job_id, message).await
    }

    /// Terminal transition to Failed. Caller holds the completion lock.
    async fn fail_locked(&self, job_id: &str, message: &str) -> anyhow::Result<()> {
        let mut job = match self.jobs.find(job_id).await? {
            Some(job) => job,
            None => return Ok(()),
        };
        if job.status.is_terminal() {
            debug!(job_id, status = %job.status, "Skipping failure for terminal job");
            return Ok(());
        }

        job.status = JobStatus::Failed;
        job.error_message = Some(message.to_string());
        job.completed_at = Some(Utc::now());
        self.jobs.save(&job).await?;
        warn!(job_id, message, "Job failed");

        self.publisher.publish(
            job_id,
            JobEvent::Error {
                message: message.to_string(),
            },
        );
        self.publisher.publish(
            job_id,
            JobEvent::Status {
                status: JobStatus::Failed,
                message: message.to_string(),
            },
        );
        self.publish_complete(&job).await?;
        Ok(())
    }

    async fn publish_complete(&self, job: &Job) -> anyhow::Result<()> {
        let result = self.build_result(job).await?;
        self.publisher
            .publish(&job.id, JobEvent::Complete(Box::new(result)));
        Ok(())
    }

    async fn build_result(&self, job: &Job) -> anyhow::Result<JobResult> {
        let evidence = self.evidence.find_by_job(&job.id).await?;
        let distribution = distribution_of(&evidence);
        Ok(JobResult {
            job: job.clone(),
            evidence,
            distribution,
        })
    }
}
