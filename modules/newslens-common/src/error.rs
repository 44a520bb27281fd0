use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeepSearchError {
    #[error("No crawl capability available: enable the integrated crawler or configure the workflow webhook")]
    NoCrawlCapability,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid callback token")]
    InvalidCallbackToken,

    #[error("Crawl strategy failed: {0}")]
    StrategyFailure(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
