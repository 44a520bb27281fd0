// Test mocks for the orchestrator's trait boundaries.
//
// MockStrategy (CrawlStrategy) — canned evidence, canned failure, or delay
// MockWorkflow (WorkflowTrigger) — records triggers, configurable ack
// NullSink / CollectingSink (ProgressSink) — discard or record callbacks
// FlakyEvidenceRepo (EvidenceRepo) — fails writes N times, then delegates
//
// These make the whole orchestrator testable with no network and no
// database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use newslens_common::{Evidence, RawEvidence};

use crate::traits::{
    CrawlRequest, CrawlStrategy, EvidenceRepo, ProgressSink, TriggerAck, WorkflowTrigger,
};

/// Shorthand for building raw evidence in tests.
pub fn raw_evidence(url: &str, stance: Option<&str>) -> RawEvidence {
    RawEvidence {
        url: url.to_string(),
        title: format!("Title for {url}"),
        stance: stance.map(|s| s.to_string()),
        snippet: format!("Snippet from {url}"),
        source: Some("mock".to_string()),
    }
}

// ---------------------------------------------------------------------------
// MockStrategy
// ---------------------------------------------------------------------------

/// Builder-style crawl strategy. Defaults to available with no evidence;
/// chain `.with_evidence()`, `.failing_with()`, `.unavailable()`,
/// `.with_delay()` to shape behavior. Records how often it was called.
pub struct MockStrategy {
    available: bool,
    evidence: Vec<RawEvidence>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    /// Progress ticks reported through the sink before returning.
    progress_steps: u32,
    calls: AtomicUsize,
}

impl MockStrategy {
    pub fn new() -> Self {
        Self {
            available: true,
            evidence: Vec::new(),
            fail_with: None,
            delay: None,
            progress_steps: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<RawEvidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn failing_with(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_progress_steps(mut self, steps: u32) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrawlStrategy for MockStrategy {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn crawl(
        &self,
        _request: &CrawlRequest,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RawEvidence>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for step in 1..=self.progress_steps {
            sink.on_progress(step, self.progress_steps, &format!("step {step}"));
        }
        if let Some(message) = &self.fail_with {
            bail!("{message}");
        }
        for item in &self.evidence {
            sink.on_page_crawled(&item.url);
            sink.on_evidence_found(item);
        }
        Ok(self.evidence.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockWorkflow
// ---------------------------------------------------------------------------

/// Workflow trigger that records calls. Defaults to enabled and accepting;
/// chain `.disabled()`, `.rejecting()`, `.erroring()` to shape behavior.
pub struct MockWorkflow {
    enabled: bool,
    reject_with: Option<String>,
    error_with: Option<String>,
    triggers: Mutex<Vec<(String, String, Option<String>)>>,
}

impl MockWorkflow {
    pub fn new() -> Self {
        Self {
            enabled: true,
            reject_with: None,
            error_with: None,
            triggers: Mutex::new(Vec::new()),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn rejecting(mut self, message: &str) -> Self {
        self.reject_with = Some(message.to_string());
        self
    }

    pub fn erroring(mut self, message: &str) -> Self {
        self.error_with = Some(message.to_string());
        self
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.lock().unwrap().len()
    }

    pub fn triggered_job_ids(&self) -> Vec<String> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .map(|(job_id, _, _)| job_id.clone())
            .collect()
    }
}

impl Default for MockWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowTrigger for MockWorkflow {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn trigger_search(
        &self,
        job_id: &str,
        topic: &str,
        base_url: Option<&str>,
    ) -> Result<TriggerAck> {
        self.triggers.lock().unwrap().push((
            job_id.to_string(),
            topic.to_string(),
            base_url.map(|s| s.to_string()),
        ));
        if let Some(message) = &self.error_with {
            bail!("{message}");
        }
        if let Some(message) = &self.reject_with {
            return Ok(TriggerAck {
                success: false,
                message: message.clone(),
            });
        }
        Ok(TriggerAck {
            success: true,
            message: "accepted".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// FlakyEvidenceRepo
// ---------------------------------------------------------------------------

/// EvidenceRepo decorator whose `create_batch` fails a set number of times
/// before delegating. Reads always delegate. For exercising the callback
/// retry path against a transiently unavailable store.
pub struct FlakyEvidenceRepo {
    inner: std::sync::Arc<dyn EvidenceRepo>,
    remaining_failures: AtomicUsize,
}

impl FlakyEvidenceRepo {
    pub fn new(inner: std::sync::Arc<dyn EvidenceRepo>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl EvidenceRepo for FlakyEvidenceRepo {
    async fn create_batch(&self, batch: &[Evidence]) -> Result<()> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            bail!("evidence store unavailable");
        }
        self.inner.create_batch(batch).await
    }

    async fn find_by_job(&self, job_id: &str) -> Result<Vec<Evidence>> {
        self.inner.find_by_job(job_id).await
    }

    async fn delete_by_job_ids(&self, job_ids: &[String]) -> Result<()> {
        self.inner.delete_by_job_ids(job_ids).await
    }
}

// ---------------------------------------------------------------------------
// Progress sinks
// ---------------------------------------------------------------------------

/// Discards all progress callbacks.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _current: u32, _total: u32, _message: &str) {}
    fn on_page_crawled(&self, _url: &str) {}
    fn on_evidence_found(&self, _evidence: &RawEvidence) {}
    fn on_error(&self, _url: &str, _message: &str) {}
}

/// What a strategy reported through its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Progress(u32, u32, String),
    PageCrawled(String),
    EvidenceFound(String),
    Error(String, String),
}

/// Records every callback for assertions.
#[derive(Default)]
pub struct CollectingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProgressSink for CollectingSink {
    fn on_progress(&self, current: u32, total: u32, message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Progress(current, total, message.to_string()));
    }

    fn on_page_crawled(&self, url: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::PageCrawled(url.to_string()));
    }

    fn on_evidence_found(&self, evidence: &RawEvidence) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::EvidenceFound(evidence.url.clone()));
    }

    fn on_error(&self, url: &str, message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Error(url.to_string(), message.to_string()));
    }
}
