pub mod error;
pub mod token;
pub mod types;

pub use error::{Result, WorkflowError};
pub use token::{constant_time_eq, verify_callback_token};
pub use types::{CallbackEvidence, CallbackPayload, TriggerRequest, TriggerResponse};

/// Client for the external deep-search workflow webhook.
///
/// The workflow is fire-and-forget: `trigger_search` returns a synchronous
/// acknowledgement, and the actual results arrive later via an inbound
/// callback carrying a [`CallbackPayload`].
pub struct WorkflowClient {
    client: reqwest::Client,
    webhook_url: String,
    token: String,
}

impl WorkflowClient {
    /// `webhook_url` empty means the capability is disabled; `is_enabled`
    /// reports false and `trigger_search` fails with `NotConfigured`.
    pub fn new(webhook_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            token,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Trigger a deep-search run for a job. Returns the workflow's
    /// synchronous acknowledgement; results come back via callback.
    pub async fn trigger_search(
        &self,
        job_id: &str,
        topic: &str,
        base_url: Option<&str>,
    ) -> Result<TriggerResponse> {
        if !self.is_enabled() {
            return Err(WorkflowError::NotConfigured);
        }

        tracing::info!(job_id, topic, "Triggering external workflow search");

        let body = TriggerRequest {
            job_id: job_id.to_string(),
            topic: topic.to_string(),
            base_url: base_url.map(|s| s.to_string()),
        };

        let mut request = self.client.post(&self.webhook_url).json(&body);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let ack: TriggerResponse = resp.json().await?;
        tracing::info!(job_id, success = ack.success, "Workflow trigger acknowledged");
        Ok(ack)
    }
}
