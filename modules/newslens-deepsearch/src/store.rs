//! In-memory implementation of the persistence contract.
//!
//! The platform database sits behind the repo traits; this store backs the
//! orchestrator in tests and single-process deployments. Locks are plain
//! `std::sync::Mutex` — every critical section is a map operation, and no
//! guard is held across an await.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use newslens_common::{CrawlTarget, Evidence, Job, JobStatus, TargetStatus};

use crate::traits::{EvidenceRepo, JobRepo, TargetRepo};

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
    evidence: Mutex<Vec<Evidence>>,
    targets: Mutex<HashMap<String, CrawlTarget>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepo for MemoryStore {
    async fn create(&self, job: Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list(
        &self,
        page: usize,
        size: usize,
        status_filter: Option<JobStatus>,
    ) -> Result<(Vec<Job>, usize)> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| status_filter.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let page_items = matching
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect();
        Ok((page_items, total))
    }

    async fn find_by_status_created_before(
        &self,
        statuses: &[JobStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| statuses.contains(&j.status) && j.created_at < before)
            .cloned()
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        for id in ids {
            jobs.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl EvidenceRepo for MemoryStore {
    async fn create_batch(&self, batch: &[Evidence]) -> Result<()> {
        self.evidence.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }

    async fn find_by_job(&self, job_id: &str) -> Result<Vec<Evidence>> {
        Ok(self
            .evidence
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete_by_job_ids(&self, job_ids: &[String]) -> Result<()> {
        self.evidence
            .lock()
            .unwrap()
            .retain(|e| !job_ids.contains(&e.job_id));
        Ok(())
    }
}

#[async_trait]
impl TargetRepo for MemoryStore {
    async fn insert(&self, target: CrawlTarget) -> Result<()> {
        self.targets
            .lock()
            .unwrap()
            .insert(target.id.clone(), target);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<CrawlTarget>> {
        Ok(self.targets.lock().unwrap().get(id).cloned())
    }

    async fn find_by_hash(&self, url_hash: &str) -> Result<Option<CrawlTarget>> {
        Ok(self
            .targets
            .lock()
            .unwrap()
            .values()
            .find(|t| t.url_hash == url_hash)
            .cloned())
    }

    async fn save(&self, target: &CrawlTarget) -> Result<()> {
        self.targets
            .lock()
            .unwrap()
            .insert(target.id.clone(), target.clone());
        Ok(())
    }

    async fn find_retryable(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<CrawlTarget>> {
        let targets = self.targets.lock().unwrap();
        let mut retryable: Vec<CrawlTarget> = targets
            .values()
            .filter(|t| t.is_retryable(now))
            .cloned()
            .collect();
        // Priority descending, oldest-first tie-break.
        retryable.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.discovered_at.cmp(&b.discovered_at))
        });
        retryable.truncate(batch_size);
        Ok(retryable)
    }

    async fn find_by_status_discovered_before(
        &self,
        status: TargetStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<CrawlTarget>> {
        let targets = self.targets.lock().unwrap();
        Ok(targets
            .values()
            .filter(|t| t.status == status && t.discovered_at < before)
            .cloned()
            .collect())
    }
}
