//! Publication sinks for approved ideas
//!
//! Every approved idea is rendered into the same plain-text report; sinks
//! only differ in where that report goes. `parse_report` reads a saved report
//! back for batch analysis.

pub mod email;
pub mod file;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;

use crate::config::{Config, SinkKind};
use crate::ideas::{Citation, IdeaPayload};

pub use email::EmailSink;
pub use file::FileSink;

const BANNER_WIDTH: usize = 80;
const MAX_FILENAME_TITLE: usize = 50;
const TITLE_PREFIX: &str = "STARTUP IDEA:";
const SOURCES_HEADING: &str = "SOURCES & CITATIONS";
const EMPTY_SECTION: &str = "N/A";

/// Report section headings, in render order
const SECTION_HEADINGS: [&str; 6] = [
    "CORE PROBLEM",
    "VALUE PROPOSITION",
    "MARKET SIZE",
    "IDEAL CUSTOMER PROFILE (ICP)",
    "JUSTIFICATION",
    "COMPETITIVE LANDSCAPE",
];

fn section_field<'a>(idea: &'a mut IdeaPayload, heading: &str) -> Option<&'a mut String> {
    let field = match heading {
        "CORE PROBLEM" => &mut idea.core_problem,
        "VALUE PROPOSITION" => &mut idea.value_proposition,
        "MARKET SIZE" => &mut idea.market_size,
        // older reports omit the abbreviation
        "IDEAL CUSTOMER PROFILE (ICP)" | "IDEAL CUSTOMER PROFILE" => &mut idea.icp,
        "JUSTIFICATION" => &mut idea.justification,
        "COMPETITIVE LANDSCAPE" => &mut idea.competitive_landscape,
        _ => return None,
    };
    Some(field)
}

/// Destination for approved ideas
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdeaSink: Send + Sync {
    /// Publish one approved idea. Returns a short description of where it went.
    async fn publish(&self, idea: &IdeaPayload) -> Result<String>;

    /// Sink name for logs
    fn name(&self) -> &'static str;
}

/// Build the sink selected in config
pub fn from_config(config: &Config) -> Result<Arc<dyn IdeaSink>> {
    let sink: Arc<dyn IdeaSink> = match config.sink.kind {
        SinkKind::File => Arc::new(FileSink::new(&config.sink.ideas_dir)),
        SinkKind::Email => Arc::new(EmailSink::from_config(&config.email)?),
    };
    Ok(sink)
}

/// Render the full report for an approved idea
pub fn render_report(idea: &IdeaPayload, generated_at: DateTime<Local>) -> String {
    let rule = "=".repeat(BANNER_WIDTH);
    let mut out = String::new();

    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!("{} {}\n", TITLE_PREFIX, idea.title.trim()));
    out.push_str(&format!("Generated: {}\n", generated_at.format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&rule);
    out.push('\n');

    let bodies = [
        &idea.core_problem,
        &idea.value_proposition,
        &idea.market_size,
        &idea.icp,
        &idea.justification,
        &idea.competitive_landscape,
    ];
    for (heading, body) in SECTION_HEADINGS.iter().zip(bodies) {
        push_section(&mut out, heading, body.trim());
    }

    if !idea.citations.is_empty() {
        let sources = idea
            .citations
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if c.title.trim().is_empty() {
                    format!("{}. {}", i + 1, c.url)
                } else {
                    format!("{}. {}\n   {}", i + 1, c.title.trim(), c.url)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        push_section(&mut out, SOURCES_HEADING, &sources);
    }

    out
}

fn push_section(out: &mut String, heading: &str, body: &str) {
    let body = if body.is_empty() { EMPTY_SECTION } else { body };
    out.push('\n');
    out.push_str(heading);
    out.push('\n');
    out.push_str(&"-".repeat(heading.chars().count()));
    out.push('\n');
    out.push_str(body);
    out.push('\n');
}

/// Read a rendered report back into a payload.
///
/// Returns `None` when the text has no `STARTUP IDEA:` line. Sections that are
/// missing or `N/A` come back empty; keywords are not part of the report.
pub fn parse_report(text: &str) -> Option<IdeaPayload> {
    let lines: Vec<&str> = text.lines().collect();
    let title = lines
        .iter()
        .find_map(|line| line.trim().strip_prefix(TITLE_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())?;
    let mut idea = IdeaPayload::titled(title);

    // A heading is a line underlined by a dash rule of the same width
    let is_heading = |i: usize| {
        let heading = lines[i].trim();
        !heading.is_empty()
            && lines.get(i + 1).is_some_and(|rule| {
                let rule = rule.trim();
                rule.chars().count() == heading.chars().count() && rule.chars().all(|c| c == '-')
            })
    };

    let mut i = 0;
    while i < lines.len() {
        if !is_heading(i) {
            i += 1;
            continue;
        }
        let heading = lines[i].trim();
        let start = i + 2;
        let mut end = start;
        while end < lines.len() && !is_heading(end) && !lines[end].starts_with("====") {
            end += 1;
        }
        let body = lines[start..end].join("\n");
        let body = body.trim();

        if heading == SOURCES_HEADING {
            idea.citations = parse_citations(body);
        } else if let Some(field) = section_field(&mut idea, heading) {
            if body != EMPTY_SECTION {
                *field = body.to_string();
            }
        }
        i = end;
    }

    Some(idea)
}

/// Inverse of the numbered source list: `N. title` over an indented url, or `N. url`
fn parse_citations(body: &str) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut pending_title: Option<String> = None;

    for line in body.lines() {
        let numbered = line
            .split_once(". ")
            .filter(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .map(|(_, rest)| rest.trim());

        match numbered {
            Some(rest) if rest.starts_with("http") => {
                pending_title = None;
                citations.push(Citation { url: rest.to_string(), title: String::new() });
            }
            Some(rest) => pending_title = Some(rest.to_string()),
            None => {
                let url = line.trim();
                if let Some(title) = pending_title.take().filter(|_| !url.is_empty()) {
                    citations.push(Citation { url: url.to_string(), title });
                }
            }
        }
    }

    citations
}

/// Filesystem-safe form of a title, at most 50 characters
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let cut: String = joined.chars().take(MAX_FILENAME_TITLE).collect();
    if cut.is_empty() {
        "untitled".to_string()
    } else {
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> IdeaPayload {
        let mut idea = IdeaPayload::titled("Acme Analytics");
        idea.core_problem = "Dashboards nobody reads.".to_string();
        idea.market_size = "$12B TAM".to_string();
        idea.citations = vec![
            Citation { url: "https://a.example".into(), title: "Market report".into() },
            Citation { url: "https://b.example".into(), title: String::new() },
        ];
        idea
    }

    #[test]
    fn test_report_sections_in_order() {
        let at = Local.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let report = render_report(&sample(), at);
        assert!(report.contains("STARTUP IDEA: Acme Analytics"));
        assert!(report.contains("Generated: 2025-03-01 09:30:00"));

        let order = [
            "CORE PROBLEM",
            "VALUE PROPOSITION",
            "MARKET SIZE",
            "IDEAL CUSTOMER PROFILE (ICP)",
            "JUSTIFICATION",
            "COMPETITIVE LANDSCAPE",
            "SOURCES & CITATIONS",
        ];
        let positions: Vec<usize> = order.iter().map(|h| report.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        assert!(report.contains("1. Market report\n   https://a.example"));
        assert!(report.contains("2. https://b.example"));
        assert!(report.contains("VALUE PROPOSITION\n-----------------\nN/A"));
    }

    #[test]
    fn test_report_without_citations() {
        let report = render_report(&IdeaPayload::titled("Bare"), Local::now());
        assert!(!report.contains("SOURCES & CITATIONS"));
    }

    #[test]
    fn test_parse_report_reads_rendered_sections() {
        let mut idea = sample();
        idea.icp = "Heads of data at\nmid-size SaaS companies".to_string();
        let parsed = parse_report(&render_report(&idea, Local::now())).unwrap();

        assert_eq!(parsed.title, "Acme Analytics");
        assert_eq!(parsed.core_problem, "Dashboards nobody reads.");
        assert_eq!(parsed.market_size, "$12B TAM");
        assert_eq!(parsed.icp, "Heads of data at\nmid-size SaaS companies");
        assert!(parsed.value_proposition.is_empty());
        assert_eq!(parsed.citations, idea.citations);
    }

    #[test]
    fn test_parse_report_legacy_heading_and_garbage() {
        let text = "STARTUP IDEA: Ledger Copilot\n\nIDEAL CUSTOMER PROFILE\n----------------------\nSMB accountants\n\nMARKET SIZE\n-----------\n$4B\n";
        let parsed = parse_report(text).unwrap();
        assert_eq!(parsed.icp, "SMB accountants");
        assert_eq!(parsed.market_size, "$4B");

        assert!(parse_report("just some notes\n").is_none());
        assert!(parse_report("STARTUP IDEA:   \n").is_none());
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Acme: Analytics / for Teams!"), "Acme_Analytics_for_Teams");
        assert_eq!(sanitize_title("???"), "untitled");
        assert_eq!(sanitize_title(&"x".repeat(80)).len(), 50);
    }

    #[test]
    fn test_from_config_file_sink() {
        let config = Config::default();
        let sink = from_config(&config).unwrap();
        assert_eq!(sink.name(), "file");
    }
}
