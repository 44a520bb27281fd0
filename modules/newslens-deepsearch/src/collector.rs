//! Evidence intake: normalize, dedup, persist, and narrate progress.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use newslens_common::{Evidence, JobEvent, RawEvidence, Stance, StanceDistribution};

use crate::publisher::ProgressPublisher;
use crate::traits::{EvidenceRepo, JobRepo};

/// Per-item progress events during evidence persistence span this band of
/// overall job progress.
const PERSIST_BAND_START: u32 = 70;
const PERSIST_BAND_SPAN: u32 = 25;

pub struct EvidenceCollector {
    jobs: Arc<dyn JobRepo>,
    evidence: Arc<dyn EvidenceRepo>,
    publisher: Arc<ProgressPublisher>,
}

impl EvidenceCollector {
    pub fn new(
        jobs: Arc<dyn JobRepo>,
        evidence: Arc<dyn EvidenceRepo>,
        publisher: Arc<ProgressPublisher>,
    ) -> Self {
        Self {
            jobs,
            evidence,
            publisher,
        }
    }

    /// Persist a batch of raw evidence for a job.
    ///
    /// Stance labels parse case-insensitively, defaulting to neutral.
    /// Dedup is job-scoped on (url, snippet): items already stored for this
    /// job, or repeated within the batch, are dropped. One progress event
    /// is published per item with a "Processing evidence i/N" message so
    /// long imports give granular feedback instead of one bulk update.
    ///
    /// If the job is already terminal the whole batch is dropped silently —
    /// late output from a cancelled or timed-out crawl must not resurface.
    pub async fn record(&self, job_id: &str, raw: Vec<RawEvidence>) -> Result<Vec<Evidence>> {
        let mut job = match self.jobs.find(job_id).await? {
            Some(job) => job,
            None => {
                debug!(job_id, "Dropping evidence for unknown job");
                return Ok(Vec::new());
            }
        };
        if job.status.is_terminal() {
            debug!(job_id, status = %job.status, "Dropping late evidence for terminal job");
            return Ok(Vec::new());
        }

        let mut seen: HashSet<(String, String)> = self
            .evidence
            .find_by_job(job_id)
            .await?
            .into_iter()
            .map(|e| (e.url, e.snippet))
            .collect();

        let mut batch = Vec::new();
        for item in raw {
            let key = (item.url.clone(), item.snippet.clone());
            if !seen.insert(key) {
                continue;
            }
            batch.push(Evidence {
                id: Uuid::new_v4().to_string(),
                job_id: job_id.to_string(),
                url: item.url,
                title: item.title,
                stance: item
                    .stance
                    .as_deref()
                    .map(Stance::from_str_loose)
                    .unwrap_or(Stance::Neutral),
                snippet: item.snippet,
                source: item.source,
                created_at: Utc::now(),
            });
        }

        if batch.is_empty() {
            return Ok(batch);
        }

        self.evidence.create_batch(&batch).await?;

        let total = batch.len();
        for (i, evidence) in batch.iter().enumerate() {
            let done = (i + 1) as u32;
            let percent = PERSIST_BAND_START + PERSIST_BAND_SPAN * done / total as u32;
            self.publisher.publish(
                job_id,
                JobEvent::Progress {
                    percent: percent as u8,
                    message: format!("Processing evidence {done}/{total}"),
                },
            );
            self.publisher
                .publish(job_id, JobEvent::Evidence(evidence.clone()));
        }

        job.evidence_count += total as u32;
        self.jobs.save(&job).await?;

        info!(job_id, stored = total, total_for_job = job.evidence_count, "Evidence recorded");
        Ok(batch)
    }

    /// Per-stance counts and ratios for a job's stored evidence.
    ///
    /// The denominator is floored to 1: with no evidence all ratios are 0.0
    /// instead of a division-by-zero fault. Preserved edge case, not a bug.
    pub async fn stance_distribution(&self, job_id: &str) -> Result<StanceDistribution> {
        let evidence = self.evidence.find_by_job(job_id).await?;
        Ok(distribution_of(&evidence))
    }
}

/// Compute the stance breakdown of an evidence list.
pub fn distribution_of(evidence: &[Evidence]) -> StanceDistribution {
    let mut dist = StanceDistribution::default();
    for e in evidence {
        match e.stance {
            Stance::Pro => dist.pro += 1,
            Stance::Con => dist.con += 1,
            Stance::Neutral => dist.neutral += 1,
        }
    }
    let denom = dist.total().max(1) as f64;
    dist.pro_ratio = dist.pro as f64 / denom;
    dist.con_ratio = dist.con as f64 / denom;
    dist.neutral_ratio = dist.neutral as f64 / denom;
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use newslens_common::{Job, JobStatus};

    fn raw(url: &str, stance: Option<&str>, snippet: &str) -> RawEvidence {
        RawEvidence {
            url: url.to_string(),
            title: "title".to_string(),
            stance: stance.map(|s| s.to_string()),
            snippet: snippet.to_string(),
            source: None,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<ProgressPublisher>, EvidenceCollector, Job) {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(ProgressPublisher::new());
        let collector = EvidenceCollector::new(store.clone(), store.clone(), publisher.clone());
        let mut job = Job::new("election", None);
        job.status = JobStatus::InProgress;
        crate::traits::JobRepo::create(store.as_ref(), job.clone())
            .await
            .unwrap();
        (store, publisher, collector, job)
    }

    #[tokio::test]
    async fn record_parses_stances_and_bumps_count() {
        let (store, _publisher, collector, job) = setup().await;
        let stored = collector
            .record(
                &job.id,
                vec![
                    raw("https://a.example", Some("PRO"), "s1"),
                    raw("https://b.example", Some("con"), "s2"),
                    raw("https://c.example", None, "s3"),
                    raw("https://d.example", Some("whatever"), "s4"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0].stance, Stance::Pro);
        assert_eq!(stored[1].stance, Stance::Con);
        assert_eq!(stored[2].stance, Stance::Neutral);
        assert_eq!(stored[3].stance, Stance::Neutral);

        let saved = crate::traits::JobRepo::find(store.as_ref(), &job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.evidence_count, 4);
    }

    #[tokio::test]
    async fn record_dedups_within_batch_and_against_stored() {
        let (_store, _publisher, collector, job) = setup().await;
        let first = collector
            .record(
                &job.id,
                vec![
                    raw("https://a.example", None, "same"),
                    raw("https://a.example", None, "same"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Same (url, snippet) again: dropped. New snippet from same URL: kept.
        let second = collector
            .record(
                &job.id,
                vec![
                    raw("https://a.example", None, "same"),
                    raw("https://a.example", None, "different"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].snippet, "different");
    }

    #[tokio::test]
    async fn record_drops_batch_for_terminal_job() {
        let (store, _publisher, collector, mut job) = setup().await;
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        crate::traits::JobRepo::save(store.as_ref(), &job).await.unwrap();

        let stored = collector
            .record(&job.id, vec![raw("https://a.example", None, "s")])
            .await
            .unwrap();
        assert!(stored.is_empty());
        assert!(crate::traits::EvidenceRepo::find_by_job(store.as_ref(), &job.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn progress_events_advance_through_persist_band() {
        let (_store, publisher, collector, job) = setup().await;
        let mut rx = publisher.subscribe(&job.id);

        collector
            .record(
                &job.id,
                vec![
                    raw("https://a.example", None, "1"),
                    raw("https://b.example", None, "2"),
                    raw("https://c.example", None, "3"),
                    raw("https://d.example", None, "4"),
                    raw("https://e.example", None, "5"),
                ],
            )
            .await
            .unwrap();

        let mut percents = Vec::new();
        let mut evidence_events = 0;
        for _ in 0..10 {
            match rx.recv().await.unwrap() {
                JobEvent::Progress { percent, message } => {
                    assert!(message.starts_with("Processing evidence "));
                    percents.push(percent);
                }
                JobEvent::Evidence(_) => evidence_events += 1,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(evidence_events, 5);
        assert_eq!(percents, vec![75, 80, 85, 90, 95]);
    }

    #[tokio::test]
    async fn distribution_ratios_sum_to_one_or_are_zero() {
        let (_store, _publisher, collector, job) = setup().await;

        // No evidence: all zeros, no NaN.
        let empty = collector.stance_distribution(&job.id).await.unwrap();
        assert_eq!(empty.total(), 0);
        assert_eq!(empty.pro_ratio, 0.0);
        assert_eq!(empty.con_ratio, 0.0);
        assert_eq!(empty.neutral_ratio, 0.0);

        collector
            .record(
                &job.id,
                vec![
                    raw("https://a.example", Some("pro"), "1"),
                    raw("https://b.example", Some("pro"), "2"),
                    raw("https://c.example", Some("con"), "3"),
                ],
            )
            .await
            .unwrap();

        let dist = collector.stance_distribution(&job.id).await.unwrap();
        assert_eq!((dist.pro, dist.con, dist.neutral), (2, 1, 0));
        assert!((dist.pro_ratio - 0.667).abs() < 0.001);
        assert!((dist.con_ratio - 0.333).abs() < 0.001);
        let sum = dist.pro_ratio + dist.con_ratio + dist.neutral_ratio;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
