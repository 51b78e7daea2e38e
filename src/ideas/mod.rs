//! Idea memory - approved and rejected idea history
//!
//! Holds the persisted data model, the deduplication context derived from it,
//! and the compressor that folds rejection reasons into reusable learnings.

pub mod compressor;
pub mod context;
pub mod store;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

pub use compressor::{CompressionOutcome, CompressorState, LearningCompressor};
pub use context::{build_context, find_duplicate};
pub use store::{HistoryStore, JsonHistoryStore, StoreError};

/// An approved idea. Created once on approval and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaRecord {
    pub title: String,
    /// Lowercased keywords used for fuzzy deduplication
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Rendered TAM / ICP / value proposition / competition notes
    #[serde(default)]
    pub summary: String,
}

impl IdeaRecord {
    /// Build the record kept in history for an approved payload
    pub fn from_payload(payload: &IdeaPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            title: payload.title.trim().to_string(),
            keywords: normalize_keywords(&payload.keywords),
            timestamp,
            summary: payload.summary(),
        }
    }

    /// Bare title from the older history shape (title list only)
    fn legacy(title: String) -> Self {
        Self {
            title,
            keywords: BTreeSet::new(),
            timestamp: DateTime::<Utc>::default(),
            summary: String::new(),
        }
    }
}

/// A rejected idea and the evaluator's stated reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub title: String,
    pub reason: String,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Top-level persisted aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    /// `explored_ideas` is the name used by the older title-list format
    #[serde(default, alias = "explored_ideas", deserialize_with = "approved_entries")]
    pub approved_ideas: Vec<IdeaRecord>,
    #[serde(default)]
    pub rejected_ideas: Vec<RejectionRecord>,
    /// Empty until the first compression has run
    #[serde(default)]
    pub compressed_learnings: String,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    pub last_updated: DateTime<Utc>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            approved_ideas: Vec::new(),
            rejected_ideas: Vec::new(),
            compressed_learnings: String::new(),
            last_updated: Utc::now(),
        }
    }
}

impl HistoryDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an approved idea and return the stored record
    pub fn record_approval(&mut self, payload: &IdeaPayload, now: DateTime<Utc>) -> &IdeaRecord {
        self.approved_ideas.push(IdeaRecord::from_payload(payload, now));
        &self.approved_ideas[self.approved_ideas.len() - 1]
    }

    /// Append a rejection
    pub fn record_rejection(&mut self, title: &str, reason: &str, now: DateTime<Utc>) {
        self.rejected_ideas.push(RejectionRecord {
            title: title.trim().to_string(),
            reason: reason.trim().to_string(),
            timestamp: now,
        });
    }

    pub fn has_learnings(&self) -> bool {
        !self.compressed_learnings.trim().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.approved_ideas.is_empty()
            && self.rejected_ideas.is_empty()
            && !self.has_learnings()
    }
}

/// A web source cited by the evaluator during research
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Full description of an approved idea, as returned by the evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaPayload {
    pub title: String,
    #[serde(default)]
    pub core_problem: String,
    #[serde(default)]
    pub value_proposition: String,
    #[serde(default)]
    pub market_size: String,
    #[serde(default)]
    pub icp: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub competitive_landscape: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl IdeaPayload {
    /// Create a payload with only a title set
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            core_problem: String::new(),
            value_proposition: String::new(),
            market_size: String::new(),
            icp: String::new(),
            justification: String::new(),
            competitive_landscape: String::new(),
            keywords: Vec::new(),
            citations: Vec::new(),
        }
    }

    /// Compact text blob stored alongside the approved record
    pub fn summary(&self) -> String {
        let sections = [
            ("TAM", &self.market_size),
            ("ICP", &self.icp),
            ("Value", &self.value_proposition),
            ("Competition", &self.competitive_landscape),
        ];
        sections
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(label, text)| format!("{}: {}", label, text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of one evaluation call
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Approved(IdeaPayload),
    Rejected { title: String, reason: String },
}

impl Verdict {
    pub fn title(&self) -> &str {
        match self {
            Verdict::Approved(payload) => &payload.title,
            Verdict::Rejected { title, .. } => title,
        }
    }
}

/// Case- and whitespace-insensitive form of a title
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, trim and deduplicate keywords
pub fn normalize_keywords(keywords: &[String]) -> BTreeSet<String> {
    keywords
        .iter()
        .map(|k| normalize_title(k))
        .filter(|k| !k.is_empty())
        .collect()
}

/// Accept RFC 3339 timestamps as well as naive ISO-8601 ones (read as UTC)
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApprovedEntry {
    Record(IdeaRecord),
    Title(String),
}

/// Approved entries may be full records or bare title strings
fn approved_entries<'de, D>(deserializer: D) -> Result<Vec<IdeaRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<ApprovedEntry>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            ApprovedEntry::Record(record) => record,
            ApprovedEntry::Title(title) => IdeaRecord::legacy(title),
        })
        .collect())
}
