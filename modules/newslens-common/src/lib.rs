pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::DeepSearchConfig;
pub use error::DeepSearchError;
pub use events::JobEvent;
pub use types::*;
