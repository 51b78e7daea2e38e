//! Idea Agent - autonomous startup idea generation library
//!
//! Runs an endless generate, research and evaluate loop against an LLM with
//! web search, and keeps a persistent idea memory:
//! - approved and rejected idea history in a single JSON document
//! - a bounded deduplication context fed back into every prompt
//! - rejection reasons periodically compressed into learnings
//! - approved ideas published to a file or email sink
//! - saved reports scored and clustered in batches (`analyze`)
//!
//! # Example
//!
//! ```ignore
//! use idea_agent::{Config, IdeaLoop, JsonHistoryStore, LlmIdeaModel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!     let model = Arc::new(LlmIdeaModel::from_config(&config.llm)?);
//!     let sink = idea_agent::sink::from_config(&config)?;
//!     let store = Box::new(JsonHistoryStore::new(&config.agent.history_file));
//!     let (_tx, rx) = tokio::sync::broadcast::channel(1);
//!     IdeaLoop::new(&config, store, model, sink).run(rx, Some(1)).await;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod ideas;
pub mod logging;
pub mod orchestrator;
pub mod sink;

// Re-export commonly used types for convenience
pub use agent::{ApiFlavor, EvaluationRequest, IdeaModel, LlmClient, LlmIdeaModel};

pub use config::{Config, ConfigError};

pub use ideas::{
    HistoryDocument,
    HistoryStore,
    IdeaPayload,
    IdeaRecord,
    JsonHistoryStore,
    RejectionRecord,
    Verdict,
};

pub use orchestrator::{CycleOutcome, IdeaLoop, LoopStats};

pub use sink::{EmailSink, FileSink, IdeaSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Startup idea generation agent", NAME, VERSION)
}
