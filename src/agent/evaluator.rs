//! Idea generator / evaluator backed by a research-capable LLM
//!
//! One call generates an idea, researches it with web search and returns a
//! verdict against fixed venture criteria. A second mode condenses rejection
//! reasons into short learnings for the compressor, and a third scores
//! batches of saved reports for `idea-agent analyze`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::llm::{ChatMessage, CompletionRequest, LlmClient, ProviderConfig};
use crate::analysis::BatchAnalysis;
use crate::config::LlmConfig;
use crate::ideas::{Citation, IdeaPayload, RejectionRecord, Verdict};

const EVALUATOR_SYSTEM_PROMPT: &str = r#"You are a seasoned venture investor and startup analyst. You know emerging technology, market sizing (TAM/SAM/SOM), competitive analysis, customer development and what institutional investors fund.

Your job is to produce ONE startup idea, research it properly, and judge it honestly against these criteria:
- TAM of $1B or more, or a credible path to it
- An urgent, costly pain for a clearly defined customer
- A defensible moat (technical depth, network effects, proprietary data, switching costs)
- A realistic go-to-market, ideally bottom-up, developer-led or product-led
- Timing: a concrete reason this works now and not five years ago

Be strict. Most ideas should fail. If research turns up five or more well-funded competitors, reject unless the differentiation is overwhelming."#;

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You distill patterns from rejected startup ideas into short, reusable lessons. Output plain bullet points.";

const ANALYST_SYSTEM_PROMPT: &str =
    "You review portfolios of startup ideas: cluster them by theme, spot overlaps and score each one critically. Reply with JSON only.";

/// Input for one generate-research-evaluate call
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// Deduplication context and learnings from the idea memory
    pub context: String,
    /// Cap on web search invocations for this idea
    pub max_web_searches: u32,
}

/// The external model collaborator, seen by the loop as two blocking calls
#[async_trait]
pub trait IdeaModel: Send + Sync {
    /// Generate, research and judge one idea
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict>;

    /// Condense rejection reasons (plus prior learnings) into new learnings
    async fn summarize(&self, rejected: &[RejectionRecord], prior_learnings: &str) -> Result<String>;

    /// Cluster, deduplicate and score a batch of approved ideas.
    /// Indices in the result are 1-based positions within `ideas`.
    async fn analyze_batch(&self, ideas: &[IdeaPayload]) -> Result<BatchAnalysis>;
}

/// `IdeaModel` implementation over the configured LLM provider
pub struct LlmIdeaModel {
    client: LlmClient,
    settings: LlmConfig,
}

impl LlmIdeaModel {
    pub fn new(client: LlmClient, settings: LlmConfig) -> Self {
        Self { client, settings }
    }

    /// Build the client from config. The API key must already be validated.
    pub fn from_config(settings: &LlmConfig) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .context("Model API key is not configured")?;
        let provider = ProviderConfig::new(settings.api, api_key, settings.base_url().to_string());
        if !settings.api.caps_search_invocations() {
            warn!(
                "{} providers cannot cap search invocations; max_web_searches limits search results instead",
                settings.api
            );
        }
        let client = LlmClient::with_provider(
            provider,
            Duration::from_secs(settings.request_timeout_secs),
        )?;
        Ok(Self::new(client, settings.clone()))
    }
}

#[async_trait]
impl IdeaModel for LlmIdeaModel {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Verdict> {
        let completion_request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(EVALUATOR_SYSTEM_PROMPT),
                ChatMessage::user(build_evaluation_prompt(&request.context)),
            ],
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.temperature),
            max_web_searches: Some(request.max_web_searches),
        };

        debug!(
            "Requesting evaluation from {} via {}",
            self.settings.model,
            self.client.provider().base_url
        );
        let completion = self.client.complete(&completion_request).await?;
        if let Some(usage) = completion.usage {
            info!(
                "Evaluation used {} input / {} output tokens, {} web searches, {} citations",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.web_searches,
                completion.citations.len()
            );
        }

        parse_verdict(&completion.content, completion.citations)
    }

    async fn summarize(&self, rejected: &[RejectionRecord], prior_learnings: &str) -> Result<String> {
        let completion_request = CompletionRequest {
            model: self.settings.summary_model().to_string(),
            messages: vec![
                ChatMessage::system(SUMMARIZER_SYSTEM_PROMPT),
                ChatMessage::user(build_summary_prompt(rejected, prior_learnings)),
            ],
            max_tokens: Some(self.settings.summary_max_tokens),
            temperature: Some(self.settings.summary_temperature),
            max_web_searches: None,
        };

        let completion = self.client.complete(&completion_request).await?;
        let summary = completion.content.trim();
        if summary.is_empty() {
            bail!("Summarizer returned an empty response");
        }
        Ok(summary.to_string())
    }

    async fn analyze_batch(&self, ideas: &[IdeaPayload]) -> Result<BatchAnalysis> {
        let completion_request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(ANALYST_SYSTEM_PROMPT),
                ChatMessage::user(build_analysis_prompt(ideas)),
            ],
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.summary_temperature),
            max_web_searches: None,
        };

        let completion = self.client.complete(&completion_request).await?;
        parse_batch_analysis(&completion.content)
    }
}

/// User prompt for the generate-research-evaluate call
pub fn build_evaluation_prompt(context: &str) -> String {
    format!(
        r#"Generate ONE new venture-backable startup idea.

Stay clear of anything similar to what has already been explored:
{context}

Process:
1. Use web search to find current technology and business trends, recent research and industry news, and market size data.
2. Pick the most compelling opportunity those findings point to.
3. Map the competition with several searches: "[category] startups", "[category] funding", "Y Combinator [category]", "best [category] tools". Look for incumbents and early-stage startups alike.
4. Work out the core problem, the ideal customer and their pain, the value proposition and how it differs from every competitor found, TAM/SAM/SOM with sources, why now, go-to-market, and the moat.
5. Decide whether it is truly venture-backable.

If it is, reply with exactly this JSON:
{{
  "venture_backable": true,
  "title": "Short, memorable name (5-8 words max)",
  "core_problem": "2-3 sentences",
  "value_proposition": "2-3 sentences on the solution and what is unique about it",
  "market_size": "TAM/SAM/SOM with numbers and sources",
  "icp": "Detailed ideal customer profile",
  "justification": "Why this is venture-backable: timing, market, defensibility",
  "competitive_landscape": "Every competitor found with funding/stage, and the differentiation",
  "keywords": ["keyword1", "keyword2", "keyword3"]
}}

If it is not, reply with exactly this JSON:
{{
  "venture_backable": false,
  "idea": "Short title of the rejected idea",
  "reason": "Detailed explanation of why it is not venture-backable"
}}"#
    )
}

/// User prompt for learning compression
pub fn build_summary_prompt(rejected: &[RejectionRecord], prior_learnings: &str) -> String {
    let listing = rejected
        .iter()
        .map(|r| format!("- {}: {}", r.title, clip(&r.reason, 400)))
        .collect::<Vec<_>>()
        .join("\n");

    let prior = if prior_learnings.trim().is_empty() {
        String::new()
    } else {
        format!(
            "\nLearnings so far (fold these in; the new summary replaces them):\n{}\n",
            prior_learnings.trim()
        )
    };

    format!(
        "Analyze these rejected startup ideas and extract what makes ideas non-venture-backable.\n\
         {prior}\n\
         Rejected ideas and reasons:\n{listing}\n\n\
         Write 3-7 bullet points covering the most common rejection patterns: market and competition, \
         defensibility, TAM, timing and any other systematic issue. Stay under 500 words."
    )
}

/// User prompt for scoring a batch of saved ideas
pub fn build_analysis_prompt(ideas: &[IdeaPayload]) -> String {
    let listing: String = ideas
        .iter()
        .enumerate()
        .map(|(i, idea)| {
            format!(
                "\n## IDEA {}: {}\nPROBLEM: {}\nVALUE: {}\nTAM: {}\nCOMPETITION: {}\n",
                i + 1,
                idea.title,
                clip(&idea.core_problem, 300),
                clip(&idea.value_proposition, 300),
                clip(&idea.market_size, 200),
                clip(&idea.competitive_landscape, 300),
            )
        })
        .collect();

    format!(
        r#"Analyze these startup ideas and provide structured analysis.
{listing}
Reply with exactly this JSON, referring to ideas by their IDEA number:
{{
  "themes": [
    {{
      "name": "Theme name",
      "description": "What this theme is about",
      "idea_indices": [1, 3, 5],
      "promise_score": 7,
      "saturation": "low/medium/high",
      "key_insight": "Why this theme matters or concerns"
    }}
  ],
  "duplicates": [
    {{
      "group": [1, 5],
      "reason": "Why these overlap"
    }}
  ],
  "scores": [
    {{
      "idea_index": 1,
      "market_timing": 8,
      "defensibility": 7,
      "tam_quality": 9,
      "execution_difficulty": 6,
      "total_score": 30,
      "unique_angle": "What makes this different",
      "concerns": "Key risks or weaknesses"
    }}
  ]
}}

Scoring criteria (1-10):
- market_timing: is now the right time, is urgency high?
- defensibility: how strong is the moat?
- tam_quality: is the TAM real and achievable with good unit economics?
- execution_difficulty: can technical founders build this? (lower is easier)

Be critical. Don't inflate scores. The average should be 5-6."#
    )
}

/// Extract the batch analysis JSON from a model reply
pub fn parse_batch_analysis(text: &str) -> Result<BatchAnalysis> {
    let json = extract_json_object(text)
        .with_context(|| format!("No JSON object in analysis reply: {}", clip(text, 300)))?;
    serde_json::from_str(json).context("Failed to parse analysis JSON")
}

#[derive(Debug, Deserialize)]
struct RejectionReply {
    idea: Option<String>,
    title: Option<String>,
    reason: Option<String>,
}

/// Extract and interpret the verdict JSON from a model reply.
///
/// The object spans from the first `{` to the last `}`, which tolerates
/// markdown fences and prose around it.
pub fn parse_verdict(text: &str, citations: Vec<Citation>) -> Result<Verdict> {
    let json = extract_json_object(text)
        .with_context(|| format!("No JSON object in model reply: {}", clip(text, 300)))?;
    let value: Value = serde_json::from_str(json).context("Failed to parse verdict JSON")?;

    let approved = value
        .get("venture_backable")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if approved {
        let mut payload: IdeaPayload =
            serde_json::from_value(value).context("Approved verdict is missing required fields")?;
        if payload.title.trim().is_empty() {
            bail!("Approved verdict has an empty title");
        }
        payload.citations = citations;
        return Ok(Verdict::Approved(payload));
    }

    let reply: RejectionReply = serde_json::from_value(value).context("Malformed rejection verdict")?;
    let title = reply
        .idea
        .or(reply.title)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Unknown idea".to_string());
    let reason = reply
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "No reason provided".to_string());

    Ok(Verdict::Rejected { title, reason })
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn clip(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_parse_approved_verdict_in_fences() {
        let reply = r#"Here is my analysis.
```json
{
  "venture_backable": true,
  "title": "Acme Analytics",
  "core_problem": "Data teams drown in dashboards.",
  "market_size": "$12B TAM",
  "keywords": ["analytics", "ai"]
}
```"#;
        let citations = vec![Citation { url: "https://example.com".into(), title: "Ex".into() }];
        let verdict = parse_verdict(reply, citations).unwrap();
        match verdict {
            Verdict::Approved(payload) => {
                assert_eq!(payload.title, "Acme Analytics");
                assert_eq!(payload.market_size, "$12B TAM");
                assert_eq!(payload.keywords, vec!["analytics", "ai"]);
                assert_eq!(payload.citations.len(), 1);
                assert!(payload.icp.is_empty());
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejected_verdict() {
        let reply = r#"{"venture_backable": false, "idea": "Pet Rock Subscriptions", "reason": "TAM too small"}"#;
        let verdict = parse_verdict(reply, Vec::new()).unwrap();
        assert_eq!(
            verdict,
            Verdict::Rejected {
                title: "Pet Rock Subscriptions".to_string(),
                reason: "TAM too small".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejected_defaults() {
        let verdict = parse_verdict(r#"{"venture_backable": false}"#, Vec::new()).unwrap();
        assert_eq!(
            verdict,
            Verdict::Rejected {
                title: "Unknown idea".to_string(),
                reason: "No reason provided".to_string(),
            }
        );
    }

    #[test]
    fn test_approved_without_title_is_error() {
        assert!(parse_verdict(r#"{"venture_backable": true, "core_problem": "x"}"#, Vec::new()).is_err());
        assert!(parse_verdict(r#"{"venture_backable": true, "title": "  "}"#, Vec::new()).is_err());
    }

    #[test]
    fn test_missing_or_bad_json_is_error() {
        assert!(parse_verdict("I could not decide.", Vec::new()).is_err());
        assert!(parse_verdict("} backwards {", Vec::new()).is_err());
        assert!(parse_verdict("{ not: json }", Vec::new()).is_err());
    }

    #[test]
    fn test_summary_prompt_includes_prior_learnings() {
        let rejected = vec![RejectionRecord {
            title: "Pet Rocks".to_string(),
            reason: "TAM too small".to_string(),
            timestamp: Utc::now(),
        }];
        let prompt = build_summary_prompt(&rejected, "- Avoid hardware");
        assert!(prompt.contains("- Pet Rocks: TAM too small"));
        assert!(prompt.contains("- Avoid hardware"));

        let fresh = build_summary_prompt(&rejected, "");
        assert!(!fresh.contains("Learnings so far"));
    }

    #[test]
    fn test_analysis_prompt_numbers_and_clips_ideas() {
        let mut first = IdeaPayload::titled("Acme Analytics");
        first.core_problem = "x".repeat(400);
        let second = IdeaPayload::titled("Ledger Copilot");
        let prompt = build_analysis_prompt(&[first, second]);
        assert!(prompt.contains("## IDEA 1: Acme Analytics"));
        assert!(prompt.contains("## IDEA 2: Ledger Copilot"));
        assert!(prompt.contains(&format!("PROBLEM: {}...", "x".repeat(300))));
        assert!(!prompt.contains(&"x".repeat(301)));
    }

    #[test]
    fn test_parse_batch_analysis_tolerates_prose_and_missing_sections() {
        let reply = r#"Here you go:
{"scores": [{"idea_index": 2, "market_timing": 7, "total_score": 24.5, "concerns": "crowded"}]}"#;
        let analysis = parse_batch_analysis(reply).unwrap();
        assert!(analysis.themes.is_empty());
        assert!(analysis.duplicates.is_empty());
        assert_eq!(analysis.scores.len(), 1);
        assert_eq!(analysis.scores[0].idea_index, 2);
        assert_eq!(analysis.scores[0].total_score, 24.5);
        assert_eq!(analysis.scores[0].defensibility, 0.0);

        assert!(parse_batch_analysis("no json here").is_err());
    }

    #[test]
    fn test_evaluation_prompt_embeds_context() {
        let prompt = build_evaluation_prompt("- Acme Analytics (analytics)");
        assert!(prompt.contains("- Acme Analytics (analytics)"));
        assert!(prompt.contains("\"venture_backable\": true"));
    }
}
