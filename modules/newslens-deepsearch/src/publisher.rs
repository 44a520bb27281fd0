//! Fan-out of live job events to subscribers.
//!
//! One broadcast channel per job id. Delivery is at-least-once for live
//! subscribers, with no backlog for late ones; publishing to a job with
//! zero subscribers is a no-op, never an error — the orchestrator must not
//! block or fail because nobody is listening. Once a job's terminal
//! `Complete` event goes out the channel is fenced: anything published
//! after it (late progress from an in-flight crawl, a racing status
//! update) is dropped, so subscribers see exactly one terminal event and
//! nothing behind it.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use newslens_common::JobEvent;

/// Buffered events per job channel before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 256;

struct JobChannel {
    sender: broadcast::Sender<JobEvent>,
    /// High-water mark keeping observed progress non-decreasing per job.
    max_percent: u8,
    /// Set when the terminal event is published; later events are dropped.
    terminal: bool,
}

pub struct ProgressPublisher {
    channels: Mutex<HashMap<String, JobChannel>>,
}

impl ProgressPublisher {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a job's event stream. Only events published after this
    /// call are delivered.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(job_id.to_string())
            .or_insert_with(new_channel);
        channel.sender.subscribe()
    }

    /// Publish an event to a job's subscribers. Progress percentages are
    /// clamped to the job's high-water mark so no subscriber ever observes
    /// a decrease. Events published after the job's terminal event are
    /// dropped: a crawl still in flight when a job is cancelled or timed
    /// out keeps reporting, and none of that may reach subscribers.
    pub fn publish(&self, job_id: &str, event: JobEvent) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(job_id.to_string())
            .or_insert_with(new_channel);

        if channel.terminal {
            debug!(job_id, "Dropping event published after the terminal event");
            return;
        }
        if event.is_terminal() {
            channel.terminal = true;
        }

        let event = match event {
            JobEvent::Progress { percent, message } => {
                let clamped = percent.min(100).max(channel.max_percent);
                channel.max_percent = clamped;
                JobEvent::Progress {
                    percent: clamped,
                    message,
                }
            }
            other => other,
        };

        // send() errors only when there are no receivers; that is fine.
        let delivered = channel.sender.send(event).unwrap_or(0);
        if delivered == 0 {
            debug!(job_id, "Published event with no subscribers");
        }
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(job_id)
            .map_or(0, |c| c.sender.receiver_count())
    }

    /// Drop a job's channel. Called when the job is purged; any remaining
    /// receivers see the stream close.
    pub fn remove(&self, job_id: &str) {
        self.channels.lock().unwrap().remove(job_id);
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

fn new_channel() -> JobChannel {
    let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
    JobChannel {
        sender,
        max_percent: 0,
        terminal: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newslens_common::{Job, JobResult, JobStatus, StanceDistribution};

    fn progress(percent: u8) -> JobEvent {
        JobEvent::Progress {
            percent,
            message: String::new(),
        }
    }

    fn complete() -> JobEvent {
        JobEvent::Complete(Box::new(JobResult {
            job: Job::new("topic", None),
            evidence: Vec::new(),
            distribution: StanceDistribution::default(),
        }))
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let publisher = ProgressPublisher::new();
        // Must not panic or error.
        publisher.publish("j1", progress(10));
        assert_eq!(publisher.subscriber_count("j1"), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_in_order() {
        let publisher = ProgressPublisher::new();
        let mut a = publisher.subscribe("j1");
        let mut b = publisher.subscribe("j1");

        publisher.publish(
            "j1",
            JobEvent::Status {
                status: JobStatus::Pending,
                message: "queued".into(),
            },
        );
        publisher.publish("j1", progress(10));

        for rx in [&mut a, &mut b] {
            assert!(matches!(rx.recv().await.unwrap(), JobEvent::Status { .. }));
            assert!(matches!(
                rx.recv().await.unwrap(),
                JobEvent::Progress { percent: 10, .. }
            ));
        }
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let publisher = ProgressPublisher::new();
        let mut rx = publisher.subscribe("j1");

        publisher.publish("j1", progress(40));
        publisher.publish("j1", progress(25)); // late, clamped up to 40
        publisher.publish("j1", progress(90));

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let JobEvent::Progress { percent, .. } = rx.recv().await.unwrap() {
                seen.push(percent);
            }
        }
        assert_eq!(seen, vec![40, 40, 90]);
    }

    #[tokio::test]
    async fn events_are_isolated_per_job() {
        let publisher = ProgressPublisher::new();
        let mut rx1 = publisher.subscribe("j1");
        let _rx2 = publisher.subscribe("j2");

        publisher.publish("j2", progress(50));
        publisher.publish("j1", progress(5));

        if let JobEvent::Progress { percent, .. } = rx1.recv().await.unwrap() {
            assert_eq!(percent, 5);
        } else {
            panic!("expected progress event");
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let publisher = ProgressPublisher::new();
        publisher.publish("j1", progress(30));

        let mut rx = publisher.subscribe("j1");
        publisher.publish("j1", progress(60));

        if let JobEvent::Progress { percent, .. } = rx.recv().await.unwrap() {
            assert_eq!(percent, 60);
        } else {
            panic!("expected progress event");
        }
    }

    #[tokio::test]
    async fn events_after_terminal_are_dropped() {
        let publisher = ProgressPublisher::new();
        let mut rx = publisher.subscribe("j1");

        publisher.publish("j1", progress(40));
        publisher.publish("j1", complete());
        // Late reports from a crawl still in flight after cancellation.
        publisher.publish("j1", progress(60));
        publisher.publish(
            "j1",
            JobEvent::Status {
                status: JobStatus::InProgress,
                message: "late".into(),
            },
        );
        publisher.publish(
            "j1",
            JobEvent::Error {
                message: "late".into(),
            },
        );
        publisher.publish("j1", complete());

        assert!(matches!(
            rx.recv().await.unwrap(),
            JobEvent::Progress { percent: 40, .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), JobEvent::Complete(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_drops_channel_and_resets_watermark() {
        let publisher = ProgressPublisher::new();
        publisher.publish("j1", progress(80));
        publisher.remove("j1");

        let mut rx = publisher.subscribe("j1");
        publisher.publish("j1", progress(10));
        if let JobEvent::Progress { percent, .. } = rx.recv().await.unwrap() {
            assert_eq!(percent, 10);
        } else {
            panic!("expected progress event");
        }
    }
}
