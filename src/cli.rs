//! CLI interface for idea-agent

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::agent::LlmIdeaModel;
use crate::analysis::{self, DEFAULT_BATCH_SIZE};
use crate::config::Config;
use crate::ideas::{build_context, HistoryStore, JsonHistoryStore};
use crate::orchestrator::IdeaLoop;

#[derive(Parser)]
#[command(name = "idea-agent")]
#[command(about = "Autonomous startup idea generator with persistent idea memory", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file (default: platform config dir)
    #[arg(short, long, global = true, env = "IDEA_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the idea loop (default when no command given)
    Run {
        /// Stop after this many cycles instead of running until interrupted
        #[arg(short = 'n', long)]
        cycles: Option<u64>,
    },
    /// Show the idea history
    History {
        /// Number of recent entries to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Print the deduplication context the next cycle would send
    Context,
    /// Cluster, deduplicate and score saved idea reports
    Analyze {
        /// Directory of saved reports (default: sink.ideas_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Where to write the JSON analysis (default: <dir>/analysis.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Ideas sent to the model per request
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Show the effective configuration
    Config,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    crate::logging::init(&config.logging)?;

    match cli.command.unwrap_or(Commands::Run { cycles: None }) {
        Commands::Run { cycles } => run_loop(config, cycles).await,
        Commands::History { limit } => {
            show_history(&config, limit);
            Ok(())
        }
        Commands::Context => {
            let history = JsonHistoryStore::new(&config.agent.history_file).load();
            println!("{}", build_context(&history, &config.context));
            Ok(())
        }
        Commands::Analyze { dir, output, batch_size } => {
            run_analysis(&config, dir, output, batch_size).await
        }
        Commands::Config => show_config(&config),
    }
}

async fn run_loop(config: Config, cycles: Option<u64>) -> Result<()> {
    // Configuration problems are fatal here, never per cycle
    config.validate()?;

    let model = Arc::new(LlmIdeaModel::from_config(&config.llm)?);
    let sink = crate::sink::from_config(&config)?;
    let store = Box::new(JsonHistoryStore::new(&config.agent.history_file));

    info!(
        "Starting {} (model: {} via {}, sink: {}, history: {})",
        crate::info(),
        config.llm.model,
        config.llm.api,
        config.sink.kind,
        config.agent.history_file.display()
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let mut idea_loop = IdeaLoop::new(&config, store, model, sink);
    idea_loop.run(shutdown_rx, cycles).await;
    Ok(())
}

async fn run_analysis(
    config: &Config,
    dir: Option<PathBuf>,
    output: Option<PathBuf>,
    batch_size: usize,
) -> Result<()> {
    config.validate_model()?;

    let dir = dir.unwrap_or_else(|| config.sink.ideas_dir.clone());
    let ideas = analysis::load_reports(&dir)?;
    if ideas.is_empty() {
        bail!("No idea reports found in {}", dir.display());
    }

    let model = LlmIdeaModel::from_config(&config.llm)?;
    let report = analysis::analyze_reports(ideas, &model, batch_size).await;
    let output = output.unwrap_or_else(|| dir.join("analysis.json"));
    analysis::write_analysis(&output, &report)?;

    println!("Analyzed {} ideas -> {}", report.total_ideas, output.display());
    println!(
        "{} themes, {} duplicate groups, {} scored",
        report.themes.len(),
        report.duplicates.len(),
        report.scores.len()
    );
    if report.failed_batches > 0 {
        warn!("{} batches failed and were left out", report.failed_batches);
    }

    if !report.top_ideas.is_empty() {
        println!("\nTop ideas:");
        for (rank, score) in report.top_ideas.iter().take(5).enumerate() {
            let title = report
                .idea(score.idea_index)
                .map_or("?", |idea| idea.idea.title.as_str());
            println!("  {}. [{}] {}", rank + 1, score.total_score, title);
            if !score.unique_angle.is_empty() {
                println!("     {}", score.unique_angle);
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn show_history(config: &Config, limit: usize) {
    let history = JsonHistoryStore::new(&config.agent.history_file).load();

    println!("History: {}", config.agent.history_file.display());
    println!("Last updated: {}", history.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "{} approved, {} rejected since last compression",
        history.approved_ideas.len(),
        history.rejected_ideas.len()
    );

    if !history.approved_ideas.is_empty() {
        println!("\nRecent approved ideas:");
        for record in history.approved_ideas.iter().rev().take(limit) {
            println!("  {}  {}", record.timestamp.format("%Y-%m-%d"), record.title);
        }
    }

    if !history.rejected_ideas.is_empty() {
        println!("\nRecent rejections:");
        for record in history.rejected_ideas.iter().rev().take(limit) {
            println!("  {}  {}: {}", record.timestamp.format("%Y-%m-%d"), record.title, record.reason);
        }
    }

    if history.has_learnings() {
        println!("\nLearnings:\n{}", history.compressed_learnings);
    }
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.to_toml()?);
    let status = |set: bool| if set { "set" } else { "not set" };
    println!("# API: {} ({})", config.llm.api, config.llm.base_url());
    println!("# API key: {}", status(config.llm.api_key.is_some()));
    println!("# Email password: {}", status(config.email.app_password.is_some()));
    Ok(())
}
