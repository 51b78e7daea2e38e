//! LLM client for the Anthropic Messages API and OpenAI-compatible chat APIs
//!
//! Both wire formats can research while answering. Anthropic's server-side
//! `web_search` tool caps the number of searches per request (`max_uses`);
//! OpenRouter's `web` plugin runs a single search and caps its results.
//! Citations produced by either are surfaced alongside the text.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::ideas::Citation;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_WEB_SEARCH_TOOL: &str = "web_search_20250305";
/// Anthropic requires `max_tokens`; used when the caller sets none
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4096;

// ============ Provider Configuration ============

/// Wire format spoken by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFlavor {
    /// Anthropic Messages API (`/messages`)
    #[default]
    Anthropic,
    /// OpenAI-style `/chat/completions` (OpenRouter, local gateways)
    OpenaiCompatible,
}

impl ApiFlavor {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ApiFlavor::Anthropic => "https://api.anthropic.com/v1",
            ApiFlavor::OpenaiCompatible => "https://openrouter.ai/api/v1",
        }
    }

    /// Whether the provider enforces a per-request cap on search invocations
    pub fn caps_search_invocations(self) -> bool {
        matches!(self, ApiFlavor::Anthropic)
    }
}

impl std::fmt::Display for ApiFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiFlavor::Anthropic => write!(f, "anthropic"),
            ApiFlavor::OpenaiCompatible => write!(f, "openai-compatible"),
        }
    }
}

/// Configuration for an LLM API provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub flavor: ApiFlavor,
    /// Base URL for the API (e.g., "https://api.anthropic.com/v1")
    pub base_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Extra headers to include in requests (e.g., X-Title, anthropic-version)
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderConfig {
    pub fn new(flavor: ApiFlavor, api_key: String, base_url: String) -> Self {
        let mut extra_headers = Vec::new();
        match flavor {
            ApiFlavor::Anthropic => {
                extra_headers.push(("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()));
            }
            ApiFlavor::OpenaiCompatible if base_url.contains("openrouter.ai") => {
                extra_headers.push(("X-Title".to_string(), "Idea Agent".to_string()));
            }
            ApiFlavor::OpenaiCompatible => {}
        }
        Self {
            flavor,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            extra_headers,
        }
    }

    fn endpoint(&self) -> String {
        match self.flavor {
            ApiFlavor::Anthropic => format!("{}/messages", self.base_url),
            ApiFlavor::OpenaiCompatible => format!("{}/chat/completions", self.base_url),
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    fn is_system(&self) -> bool {
        self.role == "system"
    }
}

// ============ Wire formats ============

/// OpenRouter plugin entry; only the web search plugin is used
#[derive(Debug, Clone, Serialize)]
struct Plugin {
    id: &'static str,
    max_results: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugins: Option<Vec<Plugin>>,
}

/// Anthropic server tool definition
#[derive(Debug, Clone, Serialize)]
struct ServerTool {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
    max_uses: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ServerTool>>,
}

/// Parameters for one completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Enables web research. Anthropic caps the number of searches at this
    /// value; OpenAI-compatible providers cap the results of their one search.
    pub max_web_searches: Option<u32>,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Server-side searches run, when the provider reports them
    pub web_searches: u64,
}

/// Parsed completion: text plus any research citations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub citations: Vec<Citation>,
    pub usage: Option<Usage>,
}

/// LLM API client
#[derive(Clone)]
pub struct LlmClient {
    client: Arc<Client>,
    provider: ProviderConfig,
}

impl LlmClient {
    /// Create a client with a specific provider configuration and request timeout
    pub fn with_provider(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client: Arc::new(client),
            provider: config,
        })
    }

    /// Get the provider configuration
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Send a completion request in the provider's wire format
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = request_body(self.provider.flavor, request)?;

        let mut req_builder = self.client.post(self.provider.endpoint());
        req_builder = match self.provider.flavor {
            ApiFlavor::Anthropic => req_builder.header("x-api-key", &self.provider.api_key),
            ApiFlavor::OpenaiCompatible => {
                req_builder.header("Authorization", format!("Bearer {}", self.provider.api_key))
            }
        };
        for (key, value) in &self.provider.extra_headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }
        let response = req_builder
            .json(&body)
            .send()
            .await
            .context("Failed to send request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, truncate(&body, 500));
        }

        let body = response.text().await.context("Failed to read response body")?;
        let completion = match self.provider.flavor {
            ApiFlavor::Anthropic => parse_messages_response(&body)?,
            ApiFlavor::OpenaiCompatible => parse_completion(&body)?,
        };

        if let Some(usage) = completion.usage {
            debug!(
                "LLM usage: {} prompt tokens, {} completion tokens, {} web searches",
                usage.prompt_tokens, usage.completion_tokens, usage.web_searches
            );
        }

        Ok(completion)
    }
}

/// JSON body for `request` in the given wire format
fn request_body(flavor: ApiFlavor, request: &CompletionRequest) -> Result<Value> {
    let body = match flavor {
        ApiFlavor::Anthropic => {
            let system = request
                .messages
                .iter()
                .filter(|m| m.is_system())
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            serde_json::to_value(MessagesRequest {
                model: &request.model,
                max_tokens: request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
                system: (!system.is_empty()).then_some(system),
                messages: request.messages.iter().filter(|m| !m.is_system()).collect(),
                temperature: request.temperature,
                tools: request.max_web_searches.map(|max_uses| {
                    vec![ServerTool {
                        kind: ANTHROPIC_WEB_SEARCH_TOOL,
                        name: "web_search",
                        max_uses,
                    }]
                }),
            })
        }
        ApiFlavor::OpenaiCompatible => serde_json::to_value(ChatRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            plugins: request
                .max_web_searches
                .map(|max_results| vec![Plugin { id: "web", max_results }]),
        }),
    };
    body.context("Failed to serialize request")
}

fn push_citation(citations: &mut Vec<Citation>, url: &str, title: Option<&str>) {
    if url.is_empty() || citations.iter().any(|c| c.url == url) {
        return;
    }
    citations.push(Citation {
        url: url.to_string(),
        title: title.unwrap_or_default().to_string(),
    });
}

/// Parse an Anthropic Messages API response body.
///
/// Text blocks are concatenated. Citations attached to text blocks come
/// first; raw search results are only used when nothing was cited.
pub fn parse_messages_response(body: &str) -> Result<Completion> {
    let raw: Value = serde_json::from_str(body.trim()).map_err(|e| {
        anyhow::anyhow!("Failed to parse JSON response: {} (body: {})", e, truncate(body, 500))
    })?;

    if raw.get("type").and_then(|t| t.as_str()) == Some("error") {
        bail!("LLM provider returned an error: {}", raw.get("error").unwrap_or(&raw));
    }

    let blocks = raw
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("No content in response"))?;

    let mut content = String::new();
    let mut citations: Vec<Citation> = Vec::new();
    let mut search_results: Vec<Citation> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    content.push_str(text);
                }
                for cite in block.get("citations").and_then(|c| c.as_array()).into_iter().flatten() {
                    let Some(url) = cite.get("url").and_then(|u| u.as_str()) else { continue };
                    push_citation(&mut citations, url, cite.get("title").and_then(|t| t.as_str()));
                }
            }
            Some("web_search_tool_result") => {
                for result in block.get("content").and_then(|c| c.as_array()).into_iter().flatten() {
                    let Some(url) = result.get("url").and_then(|u| u.as_str()) else { continue };
                    push_citation(&mut search_results, url, result.get("title").and_then(|t| t.as_str()));
                }
            }
            _ => {}
        }
    }

    if citations.is_empty() {
        citations = search_results;
    }

    let usage = raw.get("usage").map(|u| Usage {
        prompt_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        completion_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        web_searches: u
            .get("server_tool_use")
            .and_then(|s| s.get("web_search_requests"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    });

    Ok(Completion { content, citations, usage })
}

/// Parse a raw chat-completions response body.
///
/// Parsed as a loose `Value` rather than strict structs: providers disagree on
/// whether `content` is a string or an array of parts.
pub fn parse_completion(body: &str) -> Result<Completion> {
    let raw: Value = serde_json::from_str(body.trim()).map_err(|e| {
        anyhow::anyhow!("Failed to parse JSON response: {} (body: {})", e, truncate(body, 500))
    })?;

    if let Some(error) = raw.get("error") {
        bail!("LLM provider returned an error: {}", error);
    }

    let message = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| anyhow::anyhow!("No message in response"))?;

    let content = match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    let mut citations: Vec<Citation> = Vec::new();
    if let Some(annotations) = message.get("annotations").and_then(|a| a.as_array()) {
        for annotation in annotations {
            if annotation.get("type").and_then(|t| t.as_str()) != Some("url_citation") {
                continue;
            }
            let Some(cite) = annotation.get("url_citation") else { continue };
            let Some(url) = cite.get("url").and_then(|u| u.as_str()) else { continue };
            push_citation(&mut citations, url, cite.get("title").and_then(|t| t.as_str()));
        }
    }

    let usage = raw.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        web_searches: 0,
    });

    Ok(Completion { content, citations, usage })
}

/// Truncate on a char boundary for log and error output
fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...[truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
