//! Configuration for an accident-report analysis run.
//!
//! All behaviour is controlled through [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. The config is constructed once at startup and
//! passed by reference into every run; nothing in the pipeline mutates it, so
//! concurrent requests can share one instance without synchronisation.

use crate::pipeline::checkbox::Vocabulary;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for an analysis run.
///
/// # Example
/// ```rust
/// use lexintake::{AnalysisConfig, ResponseFormat};
///
/// let config = AnalysisConfig::builder()
///     .model("gpt-4.1")
///     .response_format(ResponseFormat::Structured)
///     .max_attempts(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// LLM model identifier, e.g. "gpt-4.1", "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Serve canned output instead of calling a model. Default: false.
    pub mock: bool,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction wants the most likely reading of the form, not a creative
    /// one.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 8000.
    ///
    /// A fully populated record with photo analyses runs to several thousand
    /// tokens; truncating it mid-object turns a good reply into a parse
    /// failure.
    pub max_tokens: usize,

    /// Total attempts for one model call, first try included. Default: 3.
    ///
    /// Only transport failures consume extra attempts; refusals and malformed
    /// replies stop immediately.
    pub max_attempts: u32,

    /// Base retry delay in milliseconds. Default: 1000.
    ///
    /// Doubles after each failed attempt: 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Which output shape the model is asked for. Default: [`ResponseFormat::Tagged`].
    pub response_format: ResponseFormat,

    /// Custom instruction text. If None, uses [`crate::prompts::DEFAULT_INSTRUCTIONS`].
    pub instructions: Option<String>,

    /// Phrase → checkbox-code dictionary used when a form section has no digits.
    pub vocabulary: Vocabulary,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            mock: false,
            temperature: 0.1,
            max_tokens: 8000,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 120,
            response_format: ResponseFormat::default(),
            instructions: None,
            vocabulary: Vocabulary::default(),
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("mock", &self.mock)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("response_format", &self.response_format)
            .field("vocabulary_entries", &self.vocabulary.len())
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn mock(mut self, v: bool) -> Self {
        self.config.mock = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.config.response_format = format;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    pub fn vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.config.vocabulary = vocabulary;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, ConfigError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(ConfigError("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(ConfigError("api_timeout_secs must be ≥ 1".into()));
        }
        if let Some(ref text) = c.instructions {
            if text.trim().is_empty() {
                return Err(ConfigError("instructions must not be empty".into()));
            }
        }
        Ok(self.config)
    }
}

/// Builder validation failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

// ── Enums ────────────────────────────────────────────────────────────────

/// The output shape the model is instructed to produce.
///
/// Either way, [`crate::pipeline::interpret`] dispatches on what actually
/// came back, so a model that answers in the other shape is still handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// A single JSON object matching the record schema.
    Structured,
    /// Prose containing one `<analysis>…</analysis>` fragment. (default)
    #[default]
    Tagged,
}
