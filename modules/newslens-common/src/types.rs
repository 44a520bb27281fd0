use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Job lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are absorbing: no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Timeout => write!(f, "timeout"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One deep-search request and its lifecycle state.
///
/// Invariant: `completed_at` is set if and only if `status` is terminal.
/// Only the lifecycle manager mutates a job's terminal fields, under the
/// per-job completion lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub topic: String,
    pub base_url: Option<String>,
    pub status: JobStatus,
    pub evidence_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// First-write-wins guard against double-applying an async callback.
    pub callback_received: bool,
}

impl Job {
    pub fn new(topic: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            base_url,
            status: JobStatus::Pending,
            evidence_count: 0,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            callback_received: false,
        }
    }
}

// --- Evidence ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Pro,
    Con,
    Neutral,
}

impl Stance {
    /// Parse a stance label case-insensitively. Unknown or missing values
    /// default to Neutral.
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pro" => Stance::Pro,
            "con" => Stance::Con,
            _ => Stance::Neutral,
        }
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stance::Pro => write!(f, "pro"),
            Stance::Con => write!(f, "con"),
            Stance::Neutral => write!(f, "neutral"),
        }
    }
}

/// One extracted, stance-tagged snippet contributing to a job's result.
/// Immutable once created; append-only per job; deleted only in bulk when
/// the owning job is purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub job_id: String,
    pub url: String,
    pub title: String,
    pub stance: Stance,
    pub snippet: String,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A raw per-page extraction result as reported by a crawl strategy or an
/// inbound workflow callback, before stance normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvidence {
    pub url: String,
    pub title: String,
    pub stance: Option<String>,
    pub snippet: String,
    pub source: Option<String>,
}

// --- Crawl targets ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    SearchResult,
    ArticleLink,
    TrendingTopic,
    RssMention,
    DeepSearchResult,
    AiRecommendation,
    Manual,
    ExternalApi,
}

/// One discovered URL with its own retry/backoff lifecycle, decoupled from
/// any specific job. Mutated only by the crawl execution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub id: String,
    pub url: String,
    /// sha256 of the URL, used as the dedup key.
    pub url_hash: String,
    pub discovery_source: DiscoverySource,
    pub discovery_context: Option<String>,
    /// 0-100; higher crawls first.
    pub priority: u8,
    pub status: TargetStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_after: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub collected_data_id: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlTarget {
    /// A target is retryable only while Pending, under its retry budget,
    /// and past any scheduled backoff.
    pub fn is_retryable(&self, now: DateTime<Utc>) -> bool {
        self.status == TargetStatus::Pending
            && self.retry_count < self.max_retries
            && self.next_attempt_after.map_or(true, |t| t <= now)
    }
}

// --- Result projections ---

/// Per-stance counts and ratios for a job's evidence.
///
/// Ratios divide by `max(total, 1)`: with zero evidence all ratios are 0.0
/// rather than NaN. Callers rely on this floor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StanceDistribution {
    pub pro: u32,
    pub con: u32,
    pub neutral: u32,
    pub pro_ratio: f64,
    pub con_ratio: f64,
    pub neutral_ratio: f64,
}

impl StanceDistribution {
    pub fn total(&self) -> u32 {
        self.pro + self.con + self.neutral
    }
}

/// Read-only status projection for polling callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub evidence_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            evidence_count: job.evidence_count,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Full result projection: the job plus its evidence and stance breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job: Job,
    pub evidence: Vec<Evidence>,
    pub distribution: StanceDistribution,
}

/// One page of the job listing, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn stance_parses_loosely() {
        assert_eq!(Stance::from_str_loose("PRO"), Stance::Pro);
        assert_eq!(Stance::from_str_loose("Con"), Stance::Con);
        assert_eq!(Stance::from_str_loose("neutral"), Stance::Neutral);
        assert_eq!(Stance::from_str_loose("mixed"), Stance::Neutral);
        assert_eq!(Stance::from_str_loose(""), Stance::Neutral);
    }

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new("election", None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.evidence_count, 0);
        assert!(job.completed_at.is_none());
        assert!(!job.callback_received);
        // ids are collision-resistant uuids, not sequential
        let other = Job::new("election", None);
        assert_ne!(job.id, other.id);
    }
}
