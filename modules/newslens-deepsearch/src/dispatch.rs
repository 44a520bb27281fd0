//! Strategy selection, fallback, and progress normalization.
//!
//! The dispatcher prefers the integrated multi-method crawler when it is
//! enabled and available; otherwise it triggers the webhook-based external
//! workflow. An integrated run that errors or comes back empty falls back
//! to the webhook when fallback is enabled. Capability absence is caught at
//! job-start time (`has_capability`), never mid-flight.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use newslens_common::{JobEvent, RawEvidence};

use crate::publisher::ProgressPublisher;
use crate::traits::{CrawlRequest, CrawlStrategy, ProgressSink, WorkflowTrigger};

/// Integrated-strategy progress is rescaled into this band of overall job
/// progress: 0-10% is job setup, 90-100% is evidence persistence.
const CRAWL_BAND_START: u32 = 10;
const CRAWL_BAND_SPAN: u32 = 80;

/// How a dispatched crawl concluded.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The integrated strategy ran to completion. The list may be empty:
    /// a crawl that finds nothing is a success, not a failure.
    Completed(Vec<RawEvidence>),
    /// The external workflow was triggered; results arrive later via the
    /// lifecycle manager's callback path.
    AwaitingCallback,
    /// No path produced a result. The lifecycle manager fails the job.
    Failed(String),
}

pub struct StrategyDispatcher {
    integrated: Option<Arc<dyn CrawlStrategy>>,
    workflow: Option<Arc<dyn WorkflowTrigger>>,
    integrated_enabled: bool,
    fallback_enabled: bool,
    /// Upper bound on the strategy call itself, matching the job timeout.
    strategy_timeout: Duration,
}

impl StrategyDispatcher {
    pub fn new(
        integrated: Option<Arc<dyn CrawlStrategy>>,
        workflow: Option<Arc<dyn WorkflowTrigger>>,
        integrated_enabled: bool,
        fallback_enabled: bool,
        strategy_timeout: Duration,
    ) -> Self {
        Self {
            integrated,
            workflow,
            integrated_enabled,
            fallback_enabled,
            strategy_timeout,
        }
    }

    /// Whether any crawl capability can serve a job right now. Checked by
    /// the lifecycle manager before a job is created.
    pub fn has_capability(&self) -> bool {
        self.integrated_usable() || self.workflow_usable()
    }

    fn integrated_usable(&self) -> bool {
        self.integrated_enabled
            && self
                .integrated
                .as_ref()
                .map_or(false, |s| s.is_available())
    }

    fn workflow_usable(&self) -> bool {
        self.workflow.as_ref().map_or(false, |w| w.is_enabled())
    }

    /// Run the crawl for a job, streaming progress through `sink`.
    pub async fn execute(
        &self,
        job_id: &str,
        request: &CrawlRequest,
        sink: &dyn ProgressSink,
    ) -> DispatchOutcome {
        if self.integrated_usable() {
            // self.integrated is Some here by integrated_usable.
            let strategy = match self.integrated.as_ref() {
                Some(s) => s,
                None => return DispatchOutcome::Failed("no crawl capability".into()),
            };
            info!(job_id, strategy = strategy.name(), "Dispatching integrated crawl");

            let crawl = strategy.crawl(request, sink);
            match tokio::time::timeout(self.strategy_timeout, crawl).await {
                Ok(Ok(evidence)) if !evidence.is_empty() => {
                    info!(job_id, count = evidence.len(), "Integrated crawl produced evidence");
                    return DispatchOutcome::Completed(evidence);
                }
                Ok(Ok(_empty)) => {
                    warn!(job_id, "Integrated crawl found no evidence");
                    if self.fallback_enabled && self.workflow_usable() {
                        return self.trigger_workflow(job_id, request).await;
                    }
                    return DispatchOutcome::Completed(Vec::new());
                }
                Ok(Err(e)) => {
                    warn!(job_id, error = %e, "Integrated crawl failed");
                    if self.fallback_enabled && self.workflow_usable() {
                        return self.trigger_workflow(job_id, request).await;
                    }
                    return DispatchOutcome::Failed(format!("Integrated crawl failed: {e}"));
                }
                Err(_elapsed) => {
                    warn!(job_id, "Integrated crawl exceeded the job timeout");
                    if self.fallback_enabled && self.workflow_usable() {
                        return self.trigger_workflow(job_id, request).await;
                    }
                    return DispatchOutcome::Failed("Integrated crawl timed out".into());
                }
            }
        }

        if self.workflow_usable() {
            return self.trigger_workflow(job_id, request).await;
        }

        // Unreachable when has_capability was checked at start.
        DispatchOutcome::Failed("No crawl capability available".into())
    }

    async fn trigger_workflow(&self, job_id: &str, request: &CrawlRequest) -> DispatchOutcome {
        let workflow = match self.workflow.as_ref() {
            Some(w) => w,
            None => return DispatchOutcome::Failed("Workflow capability not configured".into()),
        };
        match workflow
            .trigger_search(job_id, &request.topic, request.base_url.as_deref())
            .await
        {
            Ok(ack) if ack.success => {
                info!(job_id, "External workflow triggered, awaiting callback");
                DispatchOutcome::AwaitingCallback
            }
            Ok(ack) => {
                warn!(job_id, message = %ack.message, "Workflow rejected the trigger");
                DispatchOutcome::Failed(format!("Workflow rejected trigger: {}", ack.message))
            }
            Err(e) => {
                warn!(job_id, error = %e, "Workflow trigger failed");
                DispatchOutcome::Failed(format!("Workflow trigger failed: {e}"))
            }
        }
    }
}

/// ProgressSink bound to one job's event stream. Strategy-local progress is
/// rescaled into the 10-90% band; per-URL errors become error events; page
/// crawls refresh the message without advancing the percentage (the
/// publisher's watermark keeps percentages non-decreasing).
pub struct JobProgressSink {
    job_id: String,
    publisher: Arc<ProgressPublisher>,
}

impl JobProgressSink {
    pub fn new(job_id: String, publisher: Arc<ProgressPublisher>) -> Self {
        Self { job_id, publisher }
    }
}

impl ProgressSink for JobProgressSink {
    fn on_progress(&self, current: u32, total: u32, message: &str) {
        let percent = scale_into_crawl_band(current, total);
        self.publisher.publish(
            &self.job_id,
            JobEvent::Progress {
                percent,
                message: message.to_string(),
            },
        );
    }

    fn on_page_crawled(&self, url: &str) {
        self.publisher.publish(
            &self.job_id,
            JobEvent::Progress {
                percent: 0,
                message: format!("Crawled {url}"),
            },
        );
    }

    fn on_evidence_found(&self, evidence: &RawEvidence) {
        // Evidence events are published at persistence time by the
        // collector; here we only refresh the live message.
        self.publisher.publish(
            &self.job_id,
            JobEvent::Progress {
                percent: 0,
                message: format!("Found evidence at {}", evidence.url),
            },
        );
    }

    fn on_error(&self, url: &str, message: &str) {
        self.publisher.publish(
            &self.job_id,
            JobEvent::Error {
                message: format!("{url}: {message}"),
            },
        );
    }
}

/// Map strategy-local progress (current/total) into the 10-90% band.
fn scale_into_crawl_band(current: u32, total: u32) -> u8 {
    if total == 0 {
        return CRAWL_BAND_START as u8;
    }
    let current = current.min(total);
    (CRAWL_BAND_START + CRAWL_BAND_SPAN * current / total) as u8
}
