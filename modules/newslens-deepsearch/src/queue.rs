//! Discovery-side target queue with retry/backoff state.
//!
//! Targets are independent of jobs: many targets may feed one job, or be
//! discovered with no job at all. Only the crawl execution path mutates a
//! target once enqueued.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use newslens_common::{CrawlTarget, DiscoverySource, TargetStatus};

use crate::traits::TargetRepo;

/// Default retry budget per target.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base backoff in minutes; delay after the k-th failure is `5 * 2^k`.
const BACKOFF_BASE_MINUTES: i64 = 5;

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new target was created.
    Inserted(String),
    /// A target with the same URL hash already existed; priority was merged.
    Merged(String),
}

pub struct TargetQueue {
    targets: Arc<dyn TargetRepo>,
}

impl TargetQueue {
    pub fn new(targets: Arc<dyn TargetRepo>) -> Self {
        Self { targets }
    }

    /// Enqueue a discovered URL. Duplicate hashes merge instead of
    /// inserting: the existing target keeps the higher priority, and gains
    /// the discovery context if it had none.
    pub async fn enqueue(
        &self,
        url: &str,
        source: DiscoverySource,
        context: Option<String>,
        priority: u8,
    ) -> Result<EnqueueOutcome> {
        let url_hash = hash_url(url);
        let priority = priority.min(100);

        if let Some(mut existing) = self.targets.find_by_hash(&url_hash).await? {
            if existing.priority < priority {
                existing.priority = priority;
            }
            if existing.discovery_context.is_none() {
                existing.discovery_context = context;
            }
            existing.updated_at = Utc::now();
            self.targets.save(&existing).await?;
            debug!(url, target_id = %existing.id, "Duplicate target merged");
            return Ok(EnqueueOutcome::Merged(existing.id));
        }

        let now = Utc::now();
        let target = CrawlTarget {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            url_hash,
            discovery_source: source,
            discovery_context: context,
            priority,
            status: TargetStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_attempt_at: None,
            next_attempt_after: None,
            last_error: None,
            collected_data_id: None,
            discovered_at: now,
            updated_at: now,
            completed_at: None,
        };
        let id = target.id.clone();
        self.targets.insert(target).await?;
        debug!(url, target_id = %id, ?source, priority, "Target enqueued");
        Ok(EnqueueOutcome::Inserted(id))
    }

    /// Next batch of retryable targets: Pending, under the retry budget,
    /// past any scheduled backoff; priority descending, oldest first.
    pub async fn next_retryable(&self, batch_size: usize) -> Result<Vec<CrawlTarget>> {
        self.targets.find_retryable(Utc::now(), batch_size).await
    }

    pub async fn mark_in_progress(&self, target_id: &str) -> Result<CrawlTarget> {
        let mut target = self.load(target_id).await?;
        target.status = TargetStatus::InProgress;
        target.last_attempt_at = Some(Utc::now());
        target.updated_at = Utc::now();
        self.targets.save(&target).await?;
        Ok(target)
    }

    pub async fn mark_completed(
        &self,
        target_id: &str,
        collected_data_id: Option<String>,
    ) -> Result<CrawlTarget> {
        let mut target = self.load(target_id).await?;
        let now = Utc::now();
        target.status = TargetStatus::Completed;
        target.collected_data_id = collected_data_id;
        target.completed_at = Some(now);
        target.updated_at = now;
        self.targets.save(&target).await?;
        Ok(target)
    }

    pub async fn mark_skipped(&self, target_id: &str, reason: &str) -> Result<CrawlTarget> {
        let mut target = self.load(target_id).await?;
        target.status = TargetStatus::Skipped;
        target.last_error = Some(reason.to_string());
        target.updated_at = Utc::now();
        self.targets.save(&target).await?;
        Ok(target)
    }

    /// Record a failed crawl attempt. Increments the retry count; at the
    /// budget the target fails terminally, otherwise it stays Pending with
    /// `next_attempt_after = now + 5 * 2^retry_count` minutes
    /// (10m, 20m, 40m for the default budget of 3).
    pub async fn mark_failed(&self, target_id: &str, error: &str) -> Result<CrawlTarget> {
        let mut target = self.load(target_id).await?;
        let now = Utc::now();
        target.retry_count += 1;
        target.last_error = Some(error.to_string());
        target.last_attempt_at = Some(now);
        target.updated_at = now;

        if target.retry_count >= target.max_retries {
            target.status = TargetStatus::Failed;
            target.next_attempt_after = None;
            info!(
                target_id,
                url = %target.url,
                retries = target.retry_count,
                "Target failed terminally, retry budget exhausted"
            );
        } else {
            let delay = Duration::minutes(backoff_minutes(target.retry_count));
            target.status = TargetStatus::Pending;
            target.next_attempt_after = Some(now + delay);
            debug!(
                target_id,
                retry_count = target.retry_count,
                backoff_minutes = delay.num_minutes(),
                "Target failed, backoff scheduled"
            );
        }

        self.targets.save(&target).await?;
        Ok(target)
    }

    /// Boost a target's priority from an external signal (e.g. repeated
    /// mentions). The result is clamped to [0, 100].
    pub async fn boost_priority(&self, target_id: &str, amount: u8) -> Result<CrawlTarget> {
        let mut target = self.load(target_id).await?;
        target.priority = target.priority.saturating_add(amount).min(100);
        target.updated_at = Utc::now();
        self.targets.save(&target).await?;
        Ok(target)
    }

    /// Expire Pending targets discovered before `older_than`. Keeps the
    /// queue from accumulating stale discoveries that nothing will crawl.
    pub async fn expire_stale(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let stale = self
            .targets
            .find_by_status_discovered_before(TargetStatus::Pending, older_than)
            .await?;
        let count = stale.len();
        for mut target in stale {
            target.status = TargetStatus::Expired;
            target.updated_at = Utc::now();
            self.targets.save(&target).await?;
        }
        if count > 0 {
            info!(count, "Expired stale crawl targets");
        }
        Ok(count)
    }

    async fn load(&self, target_id: &str) -> Result<CrawlTarget> {
        self.targets
            .find(target_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Crawl target not found: {target_id}"))
    }
}

/// Dedup key for a URL: sha256 hex digest.
pub fn hash_url(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Backoff delay in minutes after the k-th failure: `5 * 2^k`.
fn backoff_minutes(retry_count: u32) -> i64 {
    BACKOFF_BASE_MINUTES * 2i64.saturating_pow(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> TargetQueue {
        TargetQueue::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn backoff_ladder() {
        assert_eq!(backoff_minutes(1), 10);
        assert_eq!(backoff_minutes(2), 20);
        assert_eq!(backoff_minutes(3), 40);
    }

    #[test]
    fn url_hash_is_stable_and_distinct() {
        assert_eq!(hash_url("https://a.example"), hash_url("https://a.example"));
        assert_ne!(hash_url("https://a.example"), hash_url("https://b.example"));
    }

    #[tokio::test]
    async fn enqueue_dedups_by_hash_and_merges_priority() {
        let q = queue();
        let first = q
            .enqueue("https://example.com/story", DiscoverySource::SearchResult, None, 40)
            .await
            .unwrap();
        let id = match first {
            EnqueueOutcome::Inserted(id) => id,
            other => panic!("expected insert, got {other:?}"),
        };

        let second = q
            .enqueue(
                "https://example.com/story",
                DiscoverySource::RssMention,
                Some("mentioned again".into()),
                70,
            )
            .await
            .unwrap();
        assert_eq!(second, EnqueueOutcome::Merged(id.clone()));

        let targets = q.next_retryable(10).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].priority, 70);
        assert_eq!(targets[0].discovery_context.as_deref(), Some("mentioned again"));
    }

    #[tokio::test]
    async fn retryable_ordering_priority_then_age() {
        let q = queue();
        q.enqueue("https://low.example", DiscoverySource::Manual, None, 10)
            .await
            .unwrap();
        q.enqueue("https://high-old.example", DiscoverySource::Manual, None, 90)
            .await
            .unwrap();
        q.enqueue("https://high-new.example", DiscoverySource::Manual, None, 90)
            .await
            .unwrap();

        let batch = q.next_retryable(10).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].url, "https://high-old.example");
        assert_eq!(batch[1].url, "https://high-new.example");
        assert_eq!(batch[2].url, "https://low.example");
    }

    #[tokio::test]
    async fn mark_failed_schedules_backoff_then_fails_terminally() {
        let q = queue();
        let id = match q
            .enqueue("https://flaky.example", DiscoverySource::ArticleLink, None, 50)
            .await
            .unwrap()
        {
            EnqueueOutcome::Inserted(id) => id,
            other => panic!("unexpected {other:?}"),
        };

        // First failure: still Pending, backoff 10 minutes out.
        let t = q.mark_failed(&id, "timeout").await.unwrap();
        assert_eq!(t.status, TargetStatus::Pending);
        assert_eq!(t.retry_count, 1);
        let after = t.next_attempt_after.unwrap();
        let delta = after - Utc::now();
        assert!(delta > Duration::minutes(9) && delta <= Duration::minutes(10));
        // Backoff set: no longer retryable right now.
        assert!(q.next_retryable(10).await.unwrap().is_empty());

        // Second failure: 20 minutes.
        let t = q.mark_failed(&id, "timeout").await.unwrap();
        assert_eq!(t.retry_count, 2);
        let delta = t.next_attempt_after.unwrap() - Utc::now();
        assert!(delta > Duration::minutes(19) && delta <= Duration::minutes(20));

        // Third failure exhausts the budget: terminal, never retryable.
        let t = q.mark_failed(&id, "timeout").await.unwrap();
        assert_eq!(t.status, TargetStatus::Failed);
        assert!(t.next_attempt_after.is_none());
        assert!(!t.is_retryable(Utc::now() + Duration::days(365)));
    }

    #[tokio::test]
    async fn boost_priority_clamps_to_100() {
        let q = queue();
        let id = match q
            .enqueue("https://hot.example", DiscoverySource::TrendingTopic, None, 80)
            .await
            .unwrap()
        {
            EnqueueOutcome::Inserted(id) => id,
            other => panic!("unexpected {other:?}"),
        };
        let t = q.boost_priority(&id, 50).await.unwrap();
        assert_eq!(t.priority, 100);
    }

    #[tokio::test]
    async fn expire_stale_only_touches_pending() {
        let q = queue();
        let stale_id = match q
            .enqueue("https://old.example", DiscoverySource::Manual, None, 10)
            .await
            .unwrap()
        {
            EnqueueOutcome::Inserted(id) => id,
            other => panic!("unexpected {other:?}"),
        };
        let done_id = match q
            .enqueue("https://done.example", DiscoverySource::Manual, None, 10)
            .await
            .unwrap()
        {
            EnqueueOutcome::Inserted(id) => id,
            other => panic!("unexpected {other:?}"),
        };
        q.mark_completed(&done_id, None).await.unwrap();

        // Horizon in the future: every Pending target counts as stale.
        let expired = q.expire_stale(Utc::now() + Duration::minutes(1)).await.unwrap();
        assert_eq!(expired, 1);

        let stale = q.targets.find(&stale_id).await.unwrap().unwrap();
        assert_eq!(stale.status, TargetStatus::Expired);
        let done = q.targets.find(&done_id).await.unwrap().unwrap();
        assert_eq!(done.status, TargetStatus::Completed);
    }

    #[tokio::test]
    async fn in_progress_targets_are_not_retryable() {
        let q = queue();
        let id = match q
            .enqueue("https://busy.example", DiscoverySource::Manual, None, 50)
            .await
            .unwrap()
        {
            EnqueueOutcome::Inserted(id) => id,
            other => panic!("unexpected {other:?}"),
        };
        q.mark_in_progress(&id).await.unwrap();
        assert!(q.next_retryable(10).await.unwrap().is_empty());
    }
}
