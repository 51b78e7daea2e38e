//! Deduplication signal - a bounded "already explored" summary of the history
//!
//! The output is injected into every generation prompt, so it must stay
//! within a fixed character budget however large the history grows. Within
//! each section the newest entries win and the oldest are dropped first.

use std::collections::BTreeSet;

use super::{normalize_keywords, normalize_title, HistoryDocument, IdeaPayload, IdeaRecord};
use crate::config::ContextConfig;

const LEARNINGS_HEADER: &str = "KEY LEARNINGS FROM PAST REJECTIONS:\n";
const APPROVED_HEADER: &str = "ALREADY EXPLORED (avoid ideas similar to these):\n";
const REJECTED_HEADER: &str = "RECENTLY REJECTED (and why):\n";
const EMPTY_HISTORY: &str = "(No ideas explored yet - this is the first one.)";
const TRUNCATION_MARKER: &str = "...";

const MAX_APPROVED_LINE: usize = 200;
const MAX_REJECTED_LINE: usize = 300;

/// Minimum keyword count on both sides before keyword overlap counts as a duplicate
const MIN_KEYWORDS_FOR_OVERLAP: usize = 3;
const KEYWORD_OVERLAP_THRESHOLD: f64 = 0.8;

/// Build the prompt context for the next generation cycle.
///
/// Pure and deterministic: the same document and budget always produce the
/// same string, and its length in characters never exceeds `budget.max_chars`.
pub fn build_context(doc: &HistoryDocument, budget: &ContextConfig) -> String {
    let mut out = ContextBuffer::new(budget.max_chars);

    if doc.has_learnings() {
        let share = budget.learnings_share.clamp(0.0, 1.0);
        let cap = (budget.max_chars as f64 * share) as usize;
        let header_len = char_len(LEARNINGS_HEADER);
        if cap > header_len + 1 {
            let body = truncate_chars(doc.compressed_learnings.trim(), cap - header_len - 1);
            out.push_section(LEARNINGS_HEADER, std::iter::once(body));
        }
    }

    let approved = doc
        .approved_ideas
        .iter()
        .rev()
        .take(budget.recent_approved)
        .map(approved_line);
    out.push_section(APPROVED_HEADER, approved);

    let rejected = doc
        .rejected_ideas
        .iter()
        .rev()
        .take(budget.recent_rejections)
        .map(|r| truncate_chars(&format!("- {}: {}", r.title, r.reason), MAX_REJECTED_LINE));
    out.push_section(REJECTED_HEADER, rejected);

    if out.is_empty() {
        out.push_raw(EMPTY_HISTORY);
    }

    out.finish()
}

/// Find an approved record that the payload duplicates, either by normalized
/// title or by heavy keyword overlap.
pub fn find_duplicate<'a>(doc: &'a HistoryDocument, payload: &IdeaPayload) -> Option<&'a IdeaRecord> {
    let title = normalize_title(&payload.title);
    let keywords = normalize_keywords(&payload.keywords);

    doc.approved_ideas.iter().find(|record| {
        normalize_title(&record.title) == title || keywords_overlap(&record.keywords, &keywords)
    })
}

fn keywords_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    if a.len() < MIN_KEYWORDS_FOR_OVERLAP || b.len() < MIN_KEYWORDS_FOR_OVERLAP {
        return false;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    union > 0 && (intersection as f64 / union as f64) >= KEYWORD_OVERLAP_THRESHOLD
}

fn approved_line(record: &IdeaRecord) -> String {
    let line = if record.keywords.is_empty() {
        format!("- {}", record.title)
    } else {
        let keywords: Vec<&str> = record.keywords.iter().map(String::as_str).collect();
        format!("- {} ({})", record.title, keywords.join(", "))
    };
    truncate_chars(&line, MAX_APPROVED_LINE)
}

/// Accumulates sections while tracking the remaining character budget
struct ContextBuffer {
    text: String,
    used: usize,
    max: usize,
}

impl ContextBuffer {
    fn new(max: usize) -> Self {
        Self { text: String::new(), used: 0, max }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Separator owed before the next section
    fn separator_len(&self) -> usize {
        if self.text.is_empty() { 0 } else { 1 }
    }

    /// Add a header plus as many lines as fit. `lines` arrive newest first
    /// and are emitted oldest first. Nothing is written if no line fits.
    fn push_section<I>(&mut self, header: &str, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut used = self.used + self.separator_len() + char_len(header);
        if used > self.max {
            return;
        }

        let mut kept = Vec::new();
        for line in lines {
            let cost = char_len(&line) + 1;
            if used + cost > self.max {
                break;
            }
            used += cost;
            kept.push(line);
        }
        if kept.is_empty() {
            return;
        }

        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(header);
        for line in kept.iter().rev() {
            self.text.push_str(line);
            self.text.push('\n');
        }
        self.used = used;
    }

    fn push_raw(&mut self, text: &str) {
        let remaining = self.max.saturating_sub(self.used);
        let text = truncate_chars(text, remaining);
        self.used += char_len(&text);
        self.text.push_str(&text);
    }

    fn finish(self) -> String {
        self.text
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `s` to at most `max` characters, marking the cut
fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    let marker_len = char_len(TRUNCATION_MARKER);
    if max <= marker_len {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
