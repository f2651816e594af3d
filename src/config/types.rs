use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI chat completions, or any host speaking the same protocol.
    #[default]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Complexity tier assigned to a message by the intent classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Complex,
}

/// Process-wide provider configuration.
///
/// Built once at startup (file, then environment overlay) and shared
/// read-only behind an `Arc` afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub active_backend: BackendKind,
    pub fallback: Option<FallbackConfig>,
    pub backends: BackendsConfig,
    pub models: ModelSelection,
    /// Per-model pricing and capabilities, keyed by model identifier.
    pub cost_table: HashMap<String, ModelSpec>,
    /// Row used for models missing from `cost_table`.
    pub default_model_spec: ModelSpec,
    pub limits: Limits,
    pub rate_limits: RateLimits,
    pub cache_ttls: CacheTtls,
    pub feature_flags: FeatureFlags,
    pub request: RequestConfig,
    pub extraction: ExtractionConfig,
}

/// Secondary backend tried once when the active backend fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub backend: BackendKind,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub openai: BackendCredentials,
    pub anthropic: BackendCredentials,
    pub gemini: BackendCredentials,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCredentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSelection {
    pub simple: String,
    pub complex: String,
    pub embedding: String,
}

/// Pricing (USD per million tokens) and capabilities of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_per_m: f64,
    pub output_per_m: f64,
    /// Whether native function calling may be used with this model.
    #[serde(default = "default_true")]
    pub supports_tools: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_input_len: usize,
    pub max_history: usize,
    pub max_tool_results: usize,
    pub max_tokens_simple: u32,
    pub max_tokens_complex: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub guest: WindowLimits,
    pub authenticated: WindowLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub exact_secs: u64,
    pub semantic_secs: u64,
    pub tool_secs: u64,
    /// Upper bound on cached responses before the oldest are evicted.
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enabled: bool,
    pub streaming: bool,
    pub caching: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub timeout_secs: u64,
    /// Maximum time between two stream chunks.
    pub stream_idle_timeout_secs: u64,
    /// Attempts per backend call, including the first one.
    pub max_attempts: u32,
    pub temperature: f32,
}

/// Heuristics used to pull a `{message, dealIds}` payload out of model text.
///
/// These values work around quirks of particular models, so they are
/// configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Minimum length of the text before the first `{` for it to be
    /// considered meta-commentary.
    pub meta_prefix_min_len: usize,
    /// Lower-case lead-ins identifying meta-commentary prefixes.
    pub meta_prefixes: Vec<String>,
    /// Tag names delimiting reasoning blocks (`think` means `<think>...</think>`).
    pub reasoning_tags: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("Unknown backend '{0}'. Must be one of: openai, anthropic, gemini")]
    UnknownBackend(String),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Pricing/capability row for `model`, falling back to the default row.
    pub fn model_spec(&self, model: &str) -> &ModelSpec {
        self.cost_table
            .get(model)
            .unwrap_or(&self.default_model_spec)
    }

    /// Estimated USD cost of a completion.
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let spec = self.model_spec(model);
        (input_tokens as f64 / 1_000_000.0) * spec.input_per_m
            + (output_tokens as f64 / 1_000_000.0) * spec.output_per_m
    }

    pub fn supports_tools(&self, model: &str) -> bool {
        self.model_spec(model).supports_tools
    }

    pub fn model_for(&self, complexity: Complexity) -> &str {
        match complexity {
            Complexity::Simple => &self.models.simple,
            Complexity::Complex => &self.models.complex,
        }
    }

    pub fn max_tokens_for(&self, complexity: Complexity) -> u32 {
        match complexity {
            Complexity::Simple => self.limits.max_tokens_simple,
            Complexity::Complex => self.limits.max_tokens_complex,
        }
    }

    pub fn credentials(&self, kind: BackendKind) -> &BackendCredentials {
        match kind {
            BackendKind::OpenAi => &self.backends.openai,
            BackendKind::Anthropic => &self.backends.anthropic,
            BackendKind::Gemini => &self.backends.gemini,
        }
    }

    pub fn credentials_mut(&mut self, kind: BackendKind) -> &mut BackendCredentials {
        match kind {
            BackendKind::OpenAi => &mut self.backends.openai,
            BackendKind::Anthropic => &mut self.backends.anthropic,
            BackendKind::Gemini => &mut self.backends.gemini,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request.timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.request.stream_idle_timeout_secs)
    }

    /// Check the configuration for values that would make every request fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut kinds = vec![self.active_backend];
        if let Some(fallback) = &self.fallback {
            if fallback.backend == self.active_backend {
                return Err(ConfigError::Invalid(format!(
                    "fallback backend '{}' is the same as the active backend",
                    fallback.backend
                )));
            }
            if fallback.model.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "fallback model must not be empty".to_string(),
                ));
            }
            kinds.push(fallback.backend);
        }

        for kind in kinds {
            let creds = self.credentials(kind);
            if creds.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "backend '{}' is selected but has no API key",
                    kind
                )));
            }
            if let Some(base_url) = &creds.base_url {
                url::Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
                    key: format!("backends.{}.base_url", kind),
                    value: format!("{} ({})", base_url, e),
                })?;
            }
        }

        if self.models.simple.trim().is_empty() || self.models.complex.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "simple and complex model names must be set".to_string(),
            ));
        }
        if self.limits.max_input_len == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_input_len must be greater than zero".to_string(),
            ));
        }
        if self.request.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "request.max_attempts must be at least 1".to_string(),
            ));
        }
        for limits in [&self.rate_limits.guest, &self.rate_limits.authenticated] {
            if limits.per_minute == 0 || limits.per_day == 0 {
                return Err(ConfigError::Invalid(
                    "rate limits must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Copy of the configuration with API keys masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for kind in [BackendKind::OpenAi, BackendKind::Anthropic, BackendKind::Gemini] {
            let creds = copy.credentials_mut(kind);
            if creds.api_key.is_some() {
                creds.api_key = Some("***".to_string());
            }
        }
        copy
    }
}

impl RateLimits {
    pub fn for_class(&self, authenticated: bool) -> WindowLimits {
        if authenticated {
            self.authenticated
        } else {
            self.guest
        }
    }
}

impl CacheTtls {
    pub fn exact(&self) -> Duration {
        Duration::from_secs(self.exact_secs)
    }

    pub fn semantic(&self) -> Duration {
        Duration::from_secs(self.semantic_secs)
    }

    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let mut cost_table = HashMap::new();
        let rows = [
            ("gpt-4o-mini", 0.15, 0.60, true),
            ("gpt-4o", 2.50, 10.00, true),
            ("gpt-4.1-mini", 0.40, 1.60, true),
            ("claude-3-5-haiku-latest", 0.80, 4.00, true),
            ("claude-sonnet-4-20250514", 3.00, 15.00, true),
            ("gemini-2.0-flash", 0.10, 0.40, true),
            ("gemini-2.5-flash", 0.30, 2.50, true),
            // Reasoning distills emit malformed tool calls; data is injected manually.
            ("deepseek-r1-distill-llama-70b", 0.75, 0.99, false),
            ("qwen-qwq-32b", 0.29, 0.39, false),
            ("text-embedding-3-small", 0.02, 0.0, false),
        ];
        for (model, input_per_m, output_per_m, supports_tools) in rows {
            cost_table.insert(
                model.to_string(),
                ModelSpec {
                    input_per_m,
                    output_per_m,
                    supports_tools,
                },
            );
        }

        Self {
            active_backend: BackendKind::OpenAi,
            fallback: None,
            backends: BackendsConfig::default(),
            models: ModelSelection::default(),
            cost_table,
            default_model_spec: ModelSpec {
                input_per_m: 1.00,
                output_per_m: 3.00,
                supports_tools: true,
            },
            limits: Limits::default(),
            rate_limits: RateLimits::default(),
            cache_ttls: CacheTtls::default(),
            feature_flags: FeatureFlags::default(),
            request: RequestConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            simple: "gpt-4o-mini".to_string(),
            complex: "gpt-4o".to_string(),
            embedding: "text-embedding-3-small".to_string(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_len: 2000,
            max_history: 10,
            max_tool_results: 10,
            max_tokens_simple: 600,
            max_tokens_complex: 1500,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            guest: WindowLimits {
                per_minute: 5,
                per_day: 50,
            },
            authenticated: WindowLimits {
                per_minute: 20,
                per_day: 500,
            },
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            exact_secs: 3600, // 1 hour
            semantic_secs: 86400, // 24 hours
            tool_secs: 900, // 15 minutes
            max_entries: 10_000,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            streaming: true,
            caching: true,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            stream_idle_timeout_secs: 30,
            max_attempts: 2,
            temperature: 0.3,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let meta_prefixes = [
            "we are given",
            "we need to",
            "let me",
            "let's",
            "okay",
            "ok,",
            "alright",
            "first,",
            "the user",
            "i need to",
            "i will",
            "i'll",
            "looking at",
            "based on the",
        ];
        Self {
            meta_prefix_min_len: 50,
            meta_prefixes: meta_prefixes.iter().map(|s| s.to_string()).collect(),
            reasoning_tags: ["think", "thinking", "reasoning", "reflection"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
