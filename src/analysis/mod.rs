//! Batch analysis of saved idea reports
//!
//! Reports written by the file sink are parsed back, sent to the model in
//! fixed-size batches for clustering, overlap detection and scoring, and the
//! per-batch results are merged into one `analysis.json`.
//!
//! Idea indices are 1-based throughout: `idea_index: 3` is `ideas[2]` of the
//! merged report.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::agent::evaluator::IdeaModel;
use crate::ideas::IdeaPayload;
use crate::sink::parse_report;

pub const DEFAULT_BATCH_SIZE: usize = 20;
/// Length of the `top_ideas` ranking
pub const TOP_IDEAS: usize = 20;

/// A cluster of related ideas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub name: String,
    pub description: String,
    pub idea_indices: Vec<usize>,
    pub promise_score: f32,
    /// "low", "medium" or "high", as the model phrased it
    pub saturation: String,
    pub key_insight: String,
}

/// Ideas the model considers overlapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateGroup {
    pub group: Vec<usize>,
    pub reason: String,
}

/// Per-idea scores, each criterion 1-10 (`execution_difficulty`: lower is easier)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaScore {
    pub idea_index: usize,
    pub market_timing: f32,
    pub defensibility: f32,
    pub tam_quality: f32,
    pub execution_difficulty: f32,
    pub total_score: f32,
    pub unique_angle: String,
    pub concerns: String,
}

/// Model output for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchAnalysis {
    pub themes: Vec<Theme>,
    pub duplicates: Vec<DuplicateGroup>,
    pub scores: Vec<IdeaScore>,
}

impl BatchAnalysis {
    /// Shift batch-local indices by `offset`, dropping any outside `1..=len`
    fn rebase(self, offset: usize, len: usize) -> Self {
        let valid = |idx: &usize| (1..=len).contains(idx);
        let mut dropped = 0usize;

        let themes = self
            .themes
            .into_iter()
            .map(|mut theme| {
                let before = theme.idea_indices.len();
                theme.idea_indices.retain(valid);
                dropped += before - theme.idea_indices.len();
                theme.idea_indices.iter_mut().for_each(|idx| *idx += offset);
                theme
            })
            .collect();

        let duplicates = self
            .duplicates
            .into_iter()
            .filter_map(|mut dup| {
                let before = dup.group.len();
                dup.group.retain(valid);
                dropped += before - dup.group.len();
                dup.group.iter_mut().for_each(|idx| *idx += offset);
                (dup.group.len() >= 2).then_some(dup)
            })
            .collect();

        let scores = self
            .scores
            .into_iter()
            .filter_map(|mut score| {
                if !valid(&score.idea_index) {
                    dropped += 1;
                    return None;
                }
                score.idea_index += offset;
                Some(score)
            })
            .collect();

        if dropped > 0 {
            warn!("Dropped {} out-of-range idea references from batch analysis", dropped);
        }

        Self { themes, duplicates, scores }
    }
}

/// A parsed report and the file it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedIdea {
    pub filename: String,
    #[serde(flatten)]
    pub idea: IdeaPayload,
}

/// Merged analysis written to `analysis.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total_ideas: usize,
    pub ideas: Vec<AnalyzedIdea>,
    pub themes: Vec<Theme>,
    pub duplicates: Vec<DuplicateGroup>,
    pub scores: Vec<IdeaScore>,
    /// Highest `total_score` first
    pub top_ideas: Vec<IdeaScore>,
    #[serde(default)]
    pub failed_batches: usize,
}

impl AnalysisReport {
    /// Look up an idea by its 1-based index
    pub fn idea(&self, index: usize) -> Option<&AnalyzedIdea> {
        index.checked_sub(1).and_then(|i| self.ideas.get(i))
    }
}

/// Parse every `*.txt` report in `dir`, in file-name order.
/// Unreadable or unrecognized files are skipped with a warning.
pub fn load_reports(dir: &Path) -> Result<Vec<AnalyzedIdea>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read ideas directory {}", dir.display()))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    let mut ideas = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping {}: {}", filename, e);
                continue;
            }
        };
        match parse_report(&text) {
            Some(idea) => ideas.push(AnalyzedIdea { filename, idea }),
            None => warn!("Skipping {}: not an idea report", filename),
        }
    }

    info!("Loaded {} idea reports from {}", ideas.len(), dir.display());
    Ok(ideas)
}

/// Analyze `ideas` in batches and merge the results.
///
/// A failed batch contributes nothing and is counted in `failed_batches`;
/// the remaining batches still run.
pub async fn analyze_reports(
    ideas: Vec<AnalyzedIdea>,
    model: &dyn IdeaModel,
    batch_size: usize,
) -> AnalysisReport {
    let batch_size = batch_size.max(1);
    let total_batches = ideas.len().div_ceil(batch_size);
    let mut report = AnalysisReport {
        total_ideas: ideas.len(),
        ..AnalysisReport::default()
    };

    for (n, chunk) in ideas.chunks(batch_size).enumerate() {
        info!("Analyzing batch {}/{} ({} ideas)", n + 1, total_batches, chunk.len());
        let payloads: Vec<IdeaPayload> = chunk.iter().map(|a| a.idea.clone()).collect();

        match model.analyze_batch(&payloads).await {
            Ok(batch) => {
                let batch = batch.rebase(n * batch_size, chunk.len());
                report.themes.extend(batch.themes);
                report.duplicates.extend(batch.duplicates);
                report.scores.extend(batch.scores);
            }
            Err(e) => {
                warn!("Batch {}/{} failed: {:#}", n + 1, total_batches, e);
                report.failed_batches += 1;
            }
        }
    }

    let mut top = report.scores.clone();
    top.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
    top.truncate(TOP_IDEAS);
    report.top_ideas = top;
    report.ideas = ideas;
    report
}

/// Write the report as pretty JSON, creating parent directories
pub fn write_analysis(path: &Path, report: &AnalysisReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialize analysis")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
