//! Live progress events fanned out to job subscribers.

use serde::{Deserialize, Serialize};

use crate::types::{Evidence, JobResult, JobStatus};

/// One event on a job's progress stream.
///
/// Delivery is at-least-once and best-effort: subscribers must tolerate
/// duplicate terminal events, and late subscribers receive no backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    /// Lifecycle transition with a human-readable message.
    Status { status: JobStatus, message: String },
    /// Overall progress, 0-100. Non-decreasing per job per subscriber.
    Progress { percent: u8, message: String },
    /// One persisted evidence record.
    Evidence(Evidence),
    /// A job-level error message.
    Error { message: String },
    /// Final projection, published exactly when the job goes terminal.
    Complete(Box<JobResult>),
}

impl JobEvent {
    /// Terminal events close the stream from the subscriber's perspective.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Complete(_))
    }
}
