//! Agent configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;

use crate::error::AgentError;

/// Default supervisor max tokens. Routing decisions are tiny JSON objects.
const DEFAULT_SUPERVISOR_MAX_TOKENS: u32 = 256;
/// Default expert max tokens.
const DEFAULT_EXPERT_MAX_TOKENS: u32 = 4096;
/// Default relevance-filter max tokens.
const DEFAULT_FILTER_MAX_TOKENS: u32 = 1024;

/// Configuration for the agent system.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// LLM provider name (e.g., "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model for the supervisor's routing decision.
    pub supervisor_model: String,
    /// Model for expert decide/answer calls.
    pub expert_model: String,
    /// Model for relevance-filter calls.
    pub filter_model: String,
    /// Maximum tokens for supervisor responses.
    pub supervisor_max_tokens: u32,
    /// Maximum tokens for expert responses.
    pub expert_max_tokens: u32,
    /// Maximum tokens for relevance-filter responses.
    pub filter_max_tokens: u32,
    /// Whether experts run the relevance filter over search results.
    pub relevance_filter: bool,
    /// Directory containing prompt template files.
    ///
    /// When set, the prompt store loads system prompts from markdown files
    /// in this directory, falling back to compiled-in defaults for any
    /// missing files.
    pub prompt_dir: Option<PathBuf>,
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
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    supervisor_model: Option<String>,
    expert_model: Option<String>,
    filter_model: Option<String>,
    supervisor_max_tokens: Option<u32>,
    expert_max_tokens: Option<u32>,
    filter_max_tokens: Option<u32>,
    relevance_filter: Option<bool>,
    prompt_dir: Option<PathBuf>,
}

impl AgentConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("COUNSEL_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("COUNSEL_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("COUNSEL_BASE_URL"))
                .ok();
        }
        if self.supervisor_model.is_none() {
            self.supervisor_model = std::env::var("COUNSEL_SUPERVISOR_MODEL").ok();
        }
        if self.expert_model.is_none() {
            self.expert_model = std::env::var("COUNSEL_EXPERT_MODEL").ok();
        }
        if self.filter_model.is_none() {
            self.filter_model = std::env::var("COUNSEL_FILTER_MODEL").ok();
        }
        if self.relevance_filter.is_none() {
            self.relevance_filter = std::env::var("COUNSEL_RELEVANCE_FILTER")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("COUNSEL_PROMPT_DIR").ok().map(PathBuf::from);
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

    /// Sets the supervisor model.
    #[must_use]
    pub fn supervisor_model(mut self, model: impl Into<String>) -> Self {
        self.supervisor_model = Some(model.into());
        self
    }

    /// Sets the expert model.
    #[must_use]
    pub fn expert_model(mut self, model: impl Into<String>) -> Self {
        self.expert_model = Some(model.into());
        self
    }

    /// Sets the relevance-filter model.
    #[must_use]
    pub fn filter_model(mut self, model: impl Into<String>) -> Self {
        self.filter_model = Some(model.into());
        self
    }

    /// Sets the supervisor max tokens.
    #[must_use]
    pub const fn supervisor_max_tokens(mut self, n: u32) -> Self {
        self.supervisor_max_tokens = Some(n);
        self
    }

    /// Sets the expert max tokens.
    #[must_use]
    pub const fn expert_max_tokens(mut self, n: u32) -> Self {
        self.expert_max_tokens = Some(n);
        self
    }

    /// Sets the relevance-filter max tokens.
    #[must_use]
    pub const fn filter_max_tokens(mut self, n: u32) -> Self {
        self.filter_max_tokens = Some(n);
        self
    }

    /// Enables or disables the relevance filter.
    #[must_use]
    pub const fn relevance_filter(mut self, enabled: bool) -> Self {
        self.relevance_filter = Some(enabled);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Builds the [`AgentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;

        Ok(AgentConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            supervisor_model: self
                .supervisor_model
                .unwrap_or_else(|| "gpt-5-mini-2025-08-07".to_string()),
            expert_model: self
                .expert_model
                .unwrap_or_else(|| "gpt-5.2-2025-12-11".to_string()),
            filter_model: self
                .filter_model
                .unwrap_or_else(|| "gpt-5-mini-2025-08-07".to_string()),
            supervisor_max_tokens: self
                .supervisor_max_tokens
                .unwrap_or(DEFAULT_SUPERVISOR_MAX_TOKENS),
            expert_max_tokens: self.expert_max_tokens.unwrap_or(DEFAULT_EXPERT_MAX_TOKENS),
            filter_max_tokens: self.filter_max_tokens.unwrap_or(DEFAULT_FILTER_MAX_TOKENS),
            relevance_filter: self.relevance_filter.unwrap_or(true),
            prompt_dir: self.prompt_dir,
        })
    }
}
