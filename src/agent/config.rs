//! Agent configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use super::client::ProviderKind;
use super::executor::DEFAULT_TOOL_TIMEOUT;
use super::history::DEFAULT_MAX_HISTORY_MESSAGES;
use super::retry::RetryOptions;
use crate::error::AgentError;

/// Default maximum LLM calls per turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 30;
/// Extra iterations granted when a structured-output schema is requested.
pub const SCHEMA_ITERATION_BONUS: u32 = 4;
/// Default maximum tokens per completion.
const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default `probe` executable.
const DEFAULT_PROBE_BIN: &str = "probe";

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// LLM provider name (`anthropic`, `openai` or `google`).
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Request timeout.
    pub timeout: Duration,
    /// Base iteration limit per turn.
    pub max_iterations: u32,
    /// Maximum retained history messages.
    pub max_history_messages: usize,
    /// Retry policy for LLM calls.
    pub retry: RetryOptions,
    /// `probe` executable.
    pub probe_bin: PathBuf,
    /// Directory searched by default.
    pub working_dir: PathBuf,
    /// Time budget per tool call.
    pub tool_timeout: Duration,
    /// Explicit MCP configuration file.
    pub mcp_config_path: Option<PathBuf>,
    /// Whether MCP servers are connected at all.
    pub mcp_enabled: bool,
}

impl AgentConfig {
    /// Creates a new builder for `AgentConfig`.
    #[must_use]
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }

    /// Iteration limit for a turn, including the schema bonus.
    #[must_use]
    pub const fn effective_max_iterations(&self, has_schema: bool) -> u32 {
        effective_max_iterations(self.max_iterations, has_schema)
    }
}

/// `base` plus [`SCHEMA_ITERATION_BONUS`] when a schema is active.
#[must_use]
pub const fn effective_max_iterations(base: u32, has_schema: bool) -> u32 {
    if has_schema {
        base.saturating_add(SCHEMA_ITERATION_BONUS)
    } else {
        base
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Option<Duration>,
    max_iterations: Option<u32>,
    max_history_messages: Option<usize>,
    retry: Option<RetryOptions>,
    probe_bin: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    tool_timeout: Option<Duration>,
    mcp_config_path: Option<PathBuf>,
    mcp_enabled: Option<bool>,
}

impl AgentConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(self) -> Self {
        self.from_lookup(|key| std::env::var(key).ok())
    }

    /// Populates unset fields through `lookup` (an environment accessor).
    ///
    /// The provider is taken from `FORCE_PROVIDER` or detected from which
    /// API key is present; key and base URL are then read for that provider.
    #[must_use]
    pub fn from_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.provider.is_none() {
            self.provider = var("FORCE_PROVIDER")
                .or_else(|| ProviderKind::detect(&var).map(|k| k.as_str().to_string()));
        }

        let kind = self
            .provider
            .as_deref()
            .and_then(|p| p.parse::<ProviderKind>().ok());
        if let Some(kind) = kind {
            if self.api_key.is_none() {
                self.api_key = kind.api_key_from(&var);
            }
            if self.base_url.is_none() {
                self.base_url = var(kind.api_url_var());
            }
        }

        if self.model.is_none() {
            self.model = var("MODEL_NAME");
        }
        if self.max_iterations.is_none() {
            self.max_iterations = var("MAX_TOOL_ITERATIONS").and_then(|v| v.trim().parse().ok());
        }
        if self.max_history_messages.is_none() {
            self.max_history_messages =
                var("MAX_HISTORY_MESSAGES").and_then(|v| v.trim().parse().ok());
        }
        if self.probe_bin.is_none() {
            self.probe_bin = var("PROBE_BIN").map(PathBuf::from);
        }
        if self.working_dir.is_none() {
            self.working_dir = var("PROBE_PATH").map(PathBuf::from);
        }
        if self.mcp_config_path.is_none() {
            self.mcp_config_path = var("MCP_CONFIG_PATH").map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the maximum tokens per completion.
    #[must_use]
    pub const fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the base iteration limit.
    #[must_use]
    pub const fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Sets the history cap.
    #[must_use]
    pub const fn max_history_messages(mut self, n: usize) -> Self {
        self.max_history_messages = Some(n);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, options: RetryOptions) -> Self {
        self.retry = Some(options);
        self
    }

    /// Sets the `probe` executable.
    #[must_use]
    pub fn probe_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.probe_bin = Some(path.into());
        self
    }

    /// Sets the default search directory.
    #[must_use]
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Sets the per-tool time budget.
    #[must_use]
    pub const fn tool_timeout(mut self, duration: Duration) -> Self {
        self.tool_timeout = Some(duration);
        self
    }

    /// Sets an explicit MCP configuration file.
    #[must_use]
    pub fn mcp_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mcp_config_path = Some(path.into());
        self
    }

    /// Enables or disables MCP servers.
    #[must_use]
    pub const fn mcp_enabled(mut self, enabled: bool) -> Self {
        self.mcp_enabled = Some(enabled);
        self
    }

    /// Builds the [`AgentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set, or
    /// [`AgentError::Config`] for a zero iteration limit.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;
        let provider = self
            .provider
            .unwrap_or_else(|| ProviderKind::Anthropic.as_str().to_string());
        let model = self.model.unwrap_or_else(|| {
            provider
                .parse::<ProviderKind>()
                .unwrap_or(ProviderKind::Anthropic)
                .default_model()
                .to_string()
        });

        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(AgentError::Config {
                message: "max iterations must be at least 1".to_string(),
            });
        }

        Ok(AgentConfig {
            provider,
            api_key,
            base_url: self.base_url,
            model,
            temperature: self.temperature,
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_iterations,
            max_history_messages: self
                .max_history_messages
                .unwrap_or(DEFAULT_MAX_HISTORY_MESSAGES),
            retry: self.retry.unwrap_or_default(),
            probe_bin: self
                .probe_bin
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROBE_BIN)),
            working_dir: self.working_dir.unwrap_or_else(|| PathBuf::from(".")),
            tool_timeout: self.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT),
            mcp_config_path: self.mcp_config_path,
            mcp_enabled: self.mcp_enabled.unwrap_or(true),
        })
    }
}
