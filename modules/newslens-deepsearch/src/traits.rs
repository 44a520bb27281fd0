// Trait abstractions for the orchestrator's external collaborators.
//
// CrawlStrategy — a pluggable crawl capability (integrated multi-method
//   crawler, or anything else that turns a topic into evidence).
// WorkflowTrigger — the webhook-based external workflow capability.
// ProgressSink — per-page progress callbacks flowing out of a strategy.
// JobRepo / EvidenceRepo / TargetRepo — the consumed persistence contract.
//
// These enable deterministic testing with MockStrategy and MockWorkflow:
// no network, no database. `cargo test` in seconds.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use newslens_common::{CrawlTarget, Evidence, Job, JobStatus, RawEvidence, TargetStatus};

// ---------------------------------------------------------------------------
// Crawl capabilities
// ---------------------------------------------------------------------------

/// What a strategy is asked to crawl: a topic, optionally anchored to a
/// starting URL.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub topic: String,
    pub base_url: Option<String>,
}

/// Progress callbacks a strategy invokes while crawling. Implementations
/// must be cheap and non-blocking; publishing happens synchronously.
pub trait ProgressSink: Send + Sync {
    /// Strategy-local progress, `current` out of `total` units of work.
    fn on_progress(&self, current: u32, total: u32, message: &str);
    /// One page fetched and processed.
    fn on_page_crawled(&self, url: &str);
    /// One evidence item found (pre-persistence; the collector owns dedup).
    fn on_evidence_found(&self, evidence: &RawEvidence);
    /// A per-URL failure. Never fatal to the job.
    fn on_error(&self, url: &str, message: &str);
}

#[async_trait]
pub trait CrawlStrategy: Send + Sync {
    /// Whether the capability can currently serve requests.
    fn is_available(&self) -> bool;

    /// Run a crawl to completion, streaming progress through `sink`.
    /// Returns the raw evidence list; stance normalization happens in the
    /// collector. Must tolerate being abandoned mid-flight (cancellation
    /// is cooperative; late output is dropped by the caller).
    async fn crawl(&self, request: &CrawlRequest, sink: &dyn ProgressSink)
        -> Result<Vec<RawEvidence>>;

    fn name(&self) -> &str;
}

/// Acknowledgement from triggering the external workflow.
#[derive(Debug, Clone)]
pub struct TriggerAck {
    pub success: bool,
    pub message: String,
}

/// The webhook-based external workflow capability. Fire-and-forget: results
/// arrive later through the lifecycle manager's callback path.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn trigger_search(
        &self,
        job_id: &str,
        topic: &str,
        base_url: Option<&str>,
    ) -> Result<TriggerAck>;
}

#[async_trait]
impl WorkflowTrigger for workflow_client::WorkflowClient {
    fn is_enabled(&self) -> bool {
        self.is_enabled()
    }

    async fn trigger_search(
        &self,
        job_id: &str,
        topic: &str,
        base_url: Option<&str>,
    ) -> Result<TriggerAck> {
        let ack = self.trigger_search(job_id, topic, base_url).await?;
        Ok(TriggerAck {
            success: ack.success,
            message: ack.message,
        })
    }
}

// ---------------------------------------------------------------------------
// Persistence contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn create(&self, job: Job) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<Job>>;

    async fn save(&self, job: &Job) -> Result<()>;

    /// Newest-first page. Returns the page plus the total matching count.
    async fn list(
        &self,
        page: usize,
        size: usize,
        status_filter: Option<JobStatus>,
    ) -> Result<(Vec<Job>, usize)>;

    /// Jobs in any of `statuses` created strictly before `before`.
    /// The sweeps select ids first so per-job events can be published.
    async fn find_by_status_created_before(
        &self,
        statuses: &[JobStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<Job>>;

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()>;
}

#[async_trait]
pub trait EvidenceRepo: Send + Sync {
    async fn create_batch(&self, batch: &[Evidence]) -> Result<()>;

    async fn find_by_job(&self, job_id: &str) -> Result<Vec<Evidence>>;

    /// Bulk delete for the retention sweep. Evidence must never outlive its
    /// owning job, so this runs before the jobs themselves are deleted.
    async fn delete_by_job_ids(&self, job_ids: &[String]) -> Result<()>;
}

#[async_trait]
pub trait TargetRepo: Send + Sync {
    async fn insert(&self, target: CrawlTarget) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<CrawlTarget>>;

    async fn find_by_hash(&self, url_hash: &str) -> Result<Option<CrawlTarget>>;

    async fn save(&self, target: &CrawlTarget) -> Result<()>;

    /// Retryable targets as of `now`, ordered priority descending then
    /// discovery time ascending, capped at `batch_size`.
    async fn find_retryable(&self, now: DateTime<Utc>, batch_size: usize)
        -> Result<Vec<CrawlTarget>>;

    /// Targets in `status` discovered strictly before `before`.
    async fn find_by_status_discovered_before(
        &self,
        status: TargetStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<CrawlTarget>>;
}
