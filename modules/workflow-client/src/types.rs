use serde::{Deserialize, Serialize};

use newslens_common::RawEvidence;

/// Body POSTed to the external workflow's search webhook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_id: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Synchronous acknowledgement from the workflow trigger endpoint.
/// Results arrive later via the inbound callback.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// One evidence item as reported by the workflow callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackEvidence {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub stance: Option<String>,
    #[serde(default)]
    pub snippet: String,
    pub source: Option<String>,
}

impl From<CallbackEvidence> for RawEvidence {
    fn from(e: CallbackEvidence) -> Self {
        RawEvidence {
            url: e.url,
            title: e.title,
            stance: e.stance,
            snippet: e.snippet,
            source: e.source,
        }
    }
}

/// Inbound callback body the workflow POSTs when a search run finishes.
/// `status` is the workflow's own vocabulary; anything other than
/// "completed"/"success" is treated as a failure report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub evidence: Vec<CallbackEvidence>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CallbackPayload {
    /// Whether the workflow reports the run as successful.
    pub fn is_success(&self) -> bool {
        matches!(self.status.to_lowercase().as_str(), "completed" | "success")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_status_vocabulary() {
        let mut payload = CallbackPayload {
            job_id: "j1".into(),
            status: "COMPLETED".into(),
            evidence: vec![],
            message: None,
        };
        assert!(payload.is_success());
        payload.status = "success".into();
        assert!(payload.is_success());
        payload.status = "error".into();
        assert!(!payload.is_success());
    }

    #[test]
    fn callback_payload_deserializes_camel_case() {
        let json = r#"{
            "jobId": "abc",
            "status": "completed",
            "evidence": [{"url": "https://example.com", "stance": "PRO", "snippet": "s"}]
        }"#;
        let payload: CallbackPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.job_id, "abc");
        assert_eq!(payload.evidence.len(), 1);
        assert_eq!(payload.evidence[0].stance.as_deref(), Some("PRO"));
        assert!(payload.evidence[0].title.is_empty());
    }
}
