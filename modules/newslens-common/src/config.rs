use std::env;

use tracing::{info, warn};

/// Orchestrator configuration loaded from environment variables.
/// Every option has a default; the subsystem runs with an empty environment.
#[derive(Debug, Clone)]
pub struct DeepSearchConfig {
    /// Jobs still Pending/InProgress after this many minutes get timed out.
    pub timeout_minutes: i64,
    /// Terminal jobs older than this many days are purged.
    pub cleanup_days: i64,
    /// Interval between timeout sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Interval between retention sweeps, in hours.
    pub cleanup_interval_hours: u64,
    /// Shared secret for inbound workflow callbacks. Empty disables the
    /// check — an intentional opt-out for local development.
    pub callback_token: String,
    /// Base URL of the external workflow webhook. Empty disables the
    /// webhook capability.
    pub workflow_webhook_url: String,
    /// Whether the integrated multi-method crawler is enabled.
    pub integrated_crawler_enabled: bool,
    /// Whether to fall back to the webhook when the integrated crawler
    /// errors or returns nothing.
    pub fallback_enabled: bool,
}

impl DeepSearchConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            timeout_minutes: parsed_env("DEEPSEARCH_TIMEOUT_MINUTES", 30),
            cleanup_days: parsed_env("DEEPSEARCH_CLEANUP_DAYS", 7),
            sweep_interval_ms: parsed_env("DEEPSEARCH_SWEEP_INTERVAL_MS", 300_000),
            cleanup_interval_hours: parsed_env("DEEPSEARCH_CLEANUP_INTERVAL_HOURS", 24),
            callback_token: env::var("WORKFLOW_CALLBACK_TOKEN").unwrap_or_default(),
            workflow_webhook_url: env::var("WORKFLOW_WEBHOOK_URL").unwrap_or_default(),
            integrated_crawler_enabled: bool_env("INTEGRATED_CRAWLER_ENABLED", true),
            fallback_enabled: bool_env("CRAWL_FALLBACK_ENABLED", true),
        }
    }

    /// Log the effective configuration with secrets redacted.
    pub fn log_redacted(&self) {
        info!(
            timeout_minutes = self.timeout_minutes,
            cleanup_days = self.cleanup_days,
            sweep_interval_ms = self.sweep_interval_ms,
            cleanup_interval_hours = self.cleanup_interval_hours,
            integrated_crawler_enabled = self.integrated_crawler_enabled,
            fallback_enabled = self.fallback_enabled,
            webhook_configured = !self.workflow_webhook_url.is_empty(),
            callback_token_set = !self.callback_token.is_empty(),
            "Deep-search configuration loaded"
        );
        if self.callback_token.is_empty() {
            warn!("WORKFLOW_CALLBACK_TOKEN is empty, callback verification is disabled");
        }
    }
}

impl Default for DeepSearchConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            cleanup_days: 7,
            sweep_interval_ms: 300_000,
            cleanup_interval_hours: 24,
            callback_token: String::new(),
            workflow_webhook_url: String::new(),
            integrated_crawler_enabled: true,
            fallback_enabled: true,
        }
    }
}

fn parsed_env<T: std::str::FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, %default, "Unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DeepSearchConfig::default();
        assert_eq!(config.timeout_minutes, 30);
        assert_eq!(config.cleanup_days, 7);
        assert_eq!(config.sweep_interval_ms, 300_000);
        assert_eq!(config.cleanup_interval_hours, 24);
        assert!(config.callback_token.is_empty());
        assert!(config.integrated_crawler_enabled);
        assert!(config.fallback_enabled);
    }
}
