//! Idea Agent - autonomous startup idea generator
//!
//! Generates, researches and evaluates startup ideas in an endless loop.

// Use the library crate for all modules
use idea_agent::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging is initialized inside the CLI once the config (and its log file) is known
    cli::run().await
}
