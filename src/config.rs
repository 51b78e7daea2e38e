//! Configuration management
//!
//! Settings come from a TOML file (all sections optional) overlaid with
//! environment variables. Credentials are only ever read from the environment
//! and are never serialized back out.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::agent::ApiFlavor;

/// Startup-time configuration problems. Any of these stops the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no model API key set for the {flavor} API (export {env_var} or IDEA_AGENT_API_KEY)")]
    MissingApiKey { flavor: ApiFlavor, env_var: &'static str },
    #[error("email sink selected but {0} is not set")]
    MissingEmailSetting(&'static str),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model provider settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,
    /// Deduplication context budget
    #[serde(default)]
    pub context: ContextConfig,
    /// Where approved ideas are published
    #[serde(default)]
    pub sink: SinkConfig,
    /// SMTP settings for the email sink
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Never written to disk; read from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Wire format: `anthropic` (Messages API) or `openai-compatible`
    #[serde(default)]
    pub api: ApiFlavor,
    /// Overrides the provider's default base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model used for generation and evaluation
    #[serde(default = "default_model")]
    pub model: String,
    /// Model used for learning compression (defaults to `model`)
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    16000
}

fn default_summary_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    1.0
}

fn default_summary_temperature() -> f32 {
    0.3
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api: ApiFlavor::default(),
            base_url: None,
            model: default_model(),
            summary_model: None,
            max_tokens: default_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            temperature: default_temperature(),
            summary_temperature: default_summary_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.model)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.api.default_base_url())
    }

    /// Provider-specific environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self.api {
            ApiFlavor::Anthropic => "ANTHROPIC_API_KEY",
            ApiFlavor::OpenaiCompatible => "OPENROUTER_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path of the persisted history document
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    /// Cap on web search invocations per idea (`max_uses` of Anthropic's
    /// web_search tool; a result cap on openai-compatible providers)
    #[serde(default = "default_max_web_searches")]
    pub max_web_searches: u32,
    /// Rejected-idea count that triggers learning compression
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    /// Pause between cycles
    #[serde(default)]
    pub cooldown_secs: u64,
    /// First pause after a failed cycle, doubled per consecutive failure
    #[serde(default = "default_backoff_base")]
    pub error_backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub error_backoff_max_secs: u64,
    /// Consecutive failures before an operator alert is logged (0 = never)
    #[serde(default)]
    pub max_consecutive_failures: u32,
}

fn default_history_file() -> PathBuf {
    PathBuf::from("ideas_history.json")
}

fn default_max_web_searches() -> u32 {
    5
}

fn default_compression_threshold() -> usize {
    100
}

fn default_backoff_base() -> u64 {
    60
}

fn default_backoff_max() -> u64 {
    3600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_file: default_history_file(),
            max_web_searches: default_max_web_searches(),
            compression_threshold: default_compression_threshold(),
            cooldown_secs: 0,
            error_backoff_base_secs: default_backoff_base(),
            error_backoff_max_secs: default_backoff_max(),
            max_consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard cap on the generated context, in characters
    #[serde(default = "default_context_chars")]
    pub max_chars: usize,
    /// Most recent approved ideas considered
    #[serde(default = "default_recent_approved")]
    pub recent_approved: usize,
    /// Most recent rejections considered
    #[serde(default = "default_recent_rejections")]
    pub recent_rejections: usize,
    /// Fraction of `max_chars` the learnings section may use
    #[serde(default = "default_learnings_share")]
    pub learnings_share: f64,
}

fn default_context_chars() -> usize {
    6000
}

fn default_recent_approved() -> usize {
    50
}

fn default_recent_rejections() -> usize {
    20
}

fn default_learnings_share() -> f64 {
    0.5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_context_chars(),
            recent_approved: default_recent_approved(),
            recent_rejections: default_recent_rejections(),
            learnings_share: default_learnings_share(),
        }
    }
}

/// Which publication mechanism receives approved ideas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    File,
    Email,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::File => write!(f, "file"),
            SinkKind::Email => write!(f, "email"),
        }
    }
}

impl std::str::FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(SinkKind::File),
            "email" => Ok(SinkKind::Email),
            _ => Err(ConfigError::InvalidValue {
                key: "sink.kind".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    /// Directory for approved-idea reports (file sink)
    #[serde(default = "default_ideas_dir")]
    pub ideas_dir: PathBuf,
}

fn default_ideas_dir() -> PathBuf {
    PathBuf::from("ideas")
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            ideas_dir: default_ideas_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Sending account, also used as the SMTP username
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    /// App-specific password, environment only
    #[serde(skip)]
    pub app_password: Option<String>,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            sender: None,
            recipient: None,
            app_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Optional append-only log file, in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location) and apply the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        let mut config = Self::load_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a config file; a missing file yields defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Overlay values from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        if let Some(value) = get(&["IDEA_AGENT_LLM_API"]) {
            self.llm.api = parse_api_flavor(&value)?;
        }
        if let Some(url) = get(&["IDEA_AGENT_BASE_URL"]) {
            self.llm.base_url = Some(url);
        }
        if let Some(key) = get(&[self.llm.api_key_env(), "IDEA_AGENT_API_KEY"]) {
            self.llm.api_key = Some(key);
        }
        if let Some(path) = get(&["IDEAS_HISTORY_FILE"]) {
            self.agent.history_file = PathBuf::from(path);
        }
        if let Some(value) = get(&["IDEA_AGENT_MAX_WEB_SEARCHES"]) {
            self.agent.max_web_searches = parse_env("IDEA_AGENT_MAX_WEB_SEARCHES", &value)?;
        }
        if let Some(value) = get(&["IDEA_AGENT_COMPRESSION_THRESHOLD"]) {
            self.agent.compression_threshold = parse_env("IDEA_AGENT_COMPRESSION_THRESHOLD", &value)?;
        }
        if let Some(value) = get(&["IDEA_AGENT_COOLDOWN_SECS"]) {
            self.agent.cooldown_secs = parse_env("IDEA_AGENT_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = get(&["IDEA_AGENT_SINK"]) {
            self.sink.kind = value.parse()?;
        }
        if let Some(sender) = get(&["IDEA_AGENT_EMAIL_SENDER"]) {
            self.email.sender = Some(sender);
        }
        if let Some(recipient) = get(&["IDEA_AGENT_EMAIL_RECIPIENT"]) {
            self.email.recipient = Some(recipient);
        }
        if let Some(password) = get(&["IDEA_AGENT_EMAIL_PASSWORD", "EMAIL_APP_PASSWORD"]) {
            self.email.app_password = Some(password);
        }

        Ok(())
    }

    /// Check what any model call depends on
    pub fn validate_model(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingApiKey {
                flavor: self.llm.api,
                env_var: self.llm.api_key_env(),
            });
        }
        Ok(())
    }

    /// Check everything a running loop depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_model()?;
        if self.agent.compression_threshold == 0 {
            return Err(ConfigError::Invalid(
                "agent.compression_threshold must be at least 1".to_string(),
            ));
        }
        if self.agent.max_web_searches == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_web_searches must be at least 1".to_string(),
            ));
        }
        if self.context.max_chars == 0 {
            return Err(ConfigError::Invalid("context.max_chars must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.context.learnings_share) {
            return Err(ConfigError::InvalidValue {
                key: "context.learnings_share".to_string(),
                value: self.context.learnings_share.to_string(),
            });
        }

        if self.sink.kind == SinkKind::Email {
            if self.email.sender.is_none() {
                return Err(ConfigError::MissingEmailSetting("email.sender"));
            }
            if self.email.recipient.is_none() {
                return Err(ConfigError::MissingEmailSetting("email.recipient"));
            }
            if self.email.app_password.is_none() {
                return Err(ConfigError::MissingEmailSetting("IDEA_AGENT_EMAIL_PASSWORD"));
            }
        }

        Ok(())
    }

    /// TOML rendering of the effective configuration. Secrets are skipped.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

fn parse_api_flavor(value: &str) -> Result<ApiFlavor, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "anthropic" => Ok(ApiFlavor::Anthropic),
        "openai-compatible" | "openai" | "openrouter" => Ok(ApiFlavor::OpenaiCompatible),
        _ => Err(ConfigError::InvalidValue {
            key: "IDEA_AGENT_LLM_API".to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Get the default configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "idea-agent", "idea-agent")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_web_searches, 5);
        assert_eq!(config.agent.compression_threshold, 100);
        assert_eq!(config.agent.cooldown_secs, 0);
        assert_eq!(config.sink.kind, SinkKind::File);
        assert_eq!(config.llm.summary_model(), config.llm.model);
        assert_eq!(config.llm.api, ApiFlavor::Anthropic);
        assert_eq!(config.llm.base_url(), "https://api.anthropic.com/v1");
    }

    #[test]
    fn test_openai_compatible_provider_from_toml() {
        let config: Config = toml::from_str(
            "[llm]\napi = \"openai-compatible\"\nmodel = \"anthropic/claude-sonnet-4.5\"\n",
        )
        .unwrap();
        assert_eq!(config.llm.api, ApiFlavor::OpenaiCompatible);
        assert_eq!(config.llm.base_url(), "https://openrouter.ai/api/v1");
        assert_eq!(config.llm.api_key_env(), "OPENROUTER_API_KEY");

        let custom: Config =
            toml::from_str("[llm]\nbase_url = \"http://localhost:8080/v1\"\n").unwrap();
        assert_eq!(custom.llm.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_api_key_env_follows_provider() {
        let vars = env(&[("OPENROUTER_API_KEY", "sk-or"), ("ANTHROPIC_API_KEY", "sk-ant")]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));

        let vars = env(&[
            ("IDEA_AGENT_LLM_API", "openrouter"),
            ("OPENROUTER_API_KEY", "sk-or"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.llm.api, ApiFlavor::OpenaiCompatible);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-or"));

        let vars = env(&[("IDEA_AGENT_LLM_API", "gemini")]);
        assert!(Config::default().apply_env(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            "[agent]\ncompression_threshold = 3\n\n[sink]\nkind = \"email\"\n",
        )
        .unwrap();
        assert_eq!(config.agent.compression_threshold, 3);
        assert_eq!(config.agent.max_web_searches, 5);
        assert_eq!(config.sink.kind, SinkKind::Email);
        assert_eq!(config.email.smtp_port, 587);
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("IDEA_AGENT_API_KEY", "sk-test"),
            ("IDEA_AGENT_COMPRESSION_THRESHOLD", "7"),
            ("IDEA_AGENT_SINK", "Email"),
            ("IDEAS_HISTORY_FILE", "/tmp/h.json"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.agent.compression_threshold, 7);
        assert_eq!(config.sink.kind, SinkKind::Email);
        assert_eq!(config.agent.history_file, PathBuf::from("/tmp/h.json"));
    }

    #[test]
    fn test_bad_numeric_env_is_rejected() {
        let vars = env(&[("IDEA_AGENT_COOLDOWN_SECS", "soon")]);
        let mut config = Config::default();
        let err = config.apply_env(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingApiKey { env_var: "ANTHROPIC_API_KEY", .. })
        ));
        assert!(config.validate_model().is_err());
    }

    #[test]
    fn test_validate_email_settings() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk".to_string());
        config.sink.kind = SinkKind::Email;
        config.email.sender = Some("me@example.com".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEmailSetting("email.recipient"))
        ));

        config.email.recipient = Some("you@example.com".to_string());
        config.email.app_password = Some("app-pass".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        config.email.app_password = Some("hunter2".to_string());
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("hunter2"));
    }
}
