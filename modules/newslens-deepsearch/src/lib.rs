//! Deep-search crawl orchestrator.
//!
//! Accepts a topic/URL search request, drives pluggable crawl strategies
//! with fallback, collects and deduplicates evidence, tracks the job
//! through its lifecycle with timeouts and retention, and fans out live
//! progress events to subscribers.

pub mod collector;
pub mod dispatch;
pub mod lifecycle;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod sweeper;
pub mod testing;
pub mod traits;

pub use collector::EvidenceCollector;
pub use dispatch::{DispatchOutcome, JobProgressSink, StrategyDispatcher};
pub use lifecycle::JobLifecycleManager;
pub use publisher::ProgressPublisher;
pub use queue::{EnqueueOutcome, TargetQueue};
pub use store::MemoryStore;
pub use sweeper::Sweeper;
pub use traits::{
    CrawlRequest, CrawlStrategy, EvidenceRepo, JobRepo, ProgressSink, TargetRepo, TriggerAck,
    WorkflowTrigger,
};
