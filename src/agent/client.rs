//! Provider selection and factory.
//!
//! Providers are chosen from the credentials that are present: Anthropic,
//! then `OpenAI`, then Google, unless one is forced by name. All three are
//! reached through their `OpenAI`-compatible endpoints.

use std::fmt;
use std::str::FromStr;

use crate::agent::config::AgentConfig;
use crate::agent::provider::LlmProvider;
use crate::agent::providers::OpenAiProvider;
use crate::error::AgentError;

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Anthropic Claude.
    Anthropic,
    /// `OpenAI`.
    OpenAi,
    /// Google Gemini.
    Google,
}

impl ProviderKind {
    /// Detection order when no provider is forced.
    pub const ALL: [Self; 3] = [Self::Anthropic, Self::OpenAi, Self::Google];

    /// Canonical lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
        }
    }

    /// Environment variables holding the API key, in lookup order.
    #[must_use]
    pub const fn api_key_vars(self) -> &'static [&'static str] {
        match self {
            Self::Anthropic => &["ANTHROPIC_API_KEY"],
            Self::OpenAi => &["OPENAI_API_KEY"],
            Self::Google => &["GOOGLE_API_KEY", "GOOGLE_GENERATIVE_AI_API_KEY"],
        }
    }

    /// Environment variable overriding the API base URL.
    #[must_use]
    pub const fn api_url_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_URL",
            Self::OpenAi => "OPENAI_API_URL",
            Self::Google => "GOOGLE_API_URL",
        }
    }

    /// `OpenAI`-compatible base URL used when none is configured.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    /// Model used when none is configured.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-7-sonnet-latest",
            Self::OpenAi => "gpt-4o",
            Self::Google => "gemini-2.0-flash",
        }
    }

    /// Reads this provider's API key through `lookup`.
    pub fn api_key_from(self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key_vars()
            .iter()
            .find_map(|var| lookup(var).filter(|v| !v.trim().is_empty()))
    }

    /// First provider, in [`Self::ALL`] order, whose API key is available.
    pub fn detect(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.api_key_from(&lookup).is_some())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "google" | "gemini" => Ok(Self::Google),
            other => Err(AgentError::UnsupportedProvider {
                name: other.to_string(),
            }),
        }
    }
}

/// Creates an [`LlmProvider`] for the configured provider.
///
/// # Errors
///
/// Returns [`AgentError::UnsupportedProvider`] for unknown provider names.
pub fn create_provider(config: &AgentConfig) -> Result<Box<dyn LlmProvider>, AgentError> {
    let kind: ProviderKind = config.provider.parse()?;
    Ok(Box::new(OpenAiProvider::new(kind, config)))
}
