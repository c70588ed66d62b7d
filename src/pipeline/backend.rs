//! Model backends: the one seam between the pipeline and an external model.
//!
//! Every backend, whatever API it talks to, returns one of two output shapes
//! ([`RawModelOutput`]) or a [`BackendError`]. The interpreter dispatches on
//! the shape alone, so a new backend only has to map its reply onto these.
//!
//! [`LlmBackend`] talks to any `edgequake-llm` provider (OpenAI, Anthropic,
//! Gemini, Ollama, …). [`MockBackend`] serves a canned record for offline
//! runs and demos.

use crate::config::AnalysisConfig;
use crate::error::BackendError;
use crate::pipeline::encode::to_image_data;
use crate::pipeline::markup::locate_fragment;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One unit of model input, in the order the model should read it.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// The fixed instruction text.
    Instruction(String),
    /// Free text: context, extracted PDF text, photo labels.
    Text(String),
    /// An already-encoded image.
    Image { bytes: Vec<u8>, mime: String },
}

/// Everything a backend needs for one call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub blocks: Vec<ContentBlock>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The two reply shapes the interpreter accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum RawModelOutput {
    /// An object already shaped like the canonical record.
    Structured(Value),
    /// Prose expected to contain one `<analysis>…</analysis>` fragment.
    FreeText(String),
}

/// A model that turns content blocks into a raw reply.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Perform exactly one call. Retrying is the invoker's job.
    async fn generate(&self, request: &ModelRequest) -> Result<RawModelOutput, BackendError>;
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// Backend over an `edgequake-llm` chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

#[async_trait]
impl ModelBackend for LlmBackend {
    fn name(&self) -> &str {
        "edgequake-llm"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<RawModelOutput, BackendError> {
        let messages = to_messages(&request.blocks);
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| {
                BackendError::Transport(format!("timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        debug!(
            "Model reply: {} input tokens, {} output tokens, {} chars",
            response.prompt_tokens,
            response.completion_tokens,
            response.content.len()
        );
        classify_reply(&response.content)
    }
}

/// Map content blocks onto chat messages.
///
/// Instructions become system messages. Each text block opens a new user
/// message and the images that follow it are attached to that message, so a
/// photo label stays next to its photo. Images before any text open a user
/// message with empty text.
fn to_messages(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut pending: Option<(String, Vec<ImageData>)> = None;

    for block in blocks {
        match block {
            ContentBlock::Instruction(text) => {
                if let Some((t, imgs)) = pending.take() {
                    messages.push(ChatMessage::user_with_images(t, imgs));
                }
                messages.push(ChatMessage::system(text.as_str()));
            }
            ContentBlock::Text(text) => {
                if let Some((t, imgs)) = pending.take() {
                    messages.push(ChatMessage::user_with_images(t, imgs));
                }
                pending = Some((text.clone(), Vec::new()));
            }
            ContentBlock::Image { bytes, mime } => {
                pending
                    .get_or_insert_with(|| (String::new(), Vec::new()))
                    .1
                    .push(to_image_data(bytes, mime));
            }
        }
    }
    if let Some((t, imgs)) = pending {
        messages.push(ChatMessage::user_with_images(t, imgs));
    }
    messages
}

static RE_REFUSAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<refusal>(.*?)</refusal>").unwrap());

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*?)\n?```$").unwrap());

/// Classify a text reply into a shape or a non-retryable failure.
///
/// * empty → malformed
/// * a closed `<refusal>…</refusal>` pair and no `<analysis>` fragment → refusal
/// * a JSON object, optionally inside a ```json fence → structured
/// * anything else → free text
pub fn classify_reply(content: &str) -> Result<RawModelOutput, BackendError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(BackendError::Malformed("empty response".into()));
    }

    let refusal = match locate_fragment(trimmed) {
        Some(_) => None,
        None => RE_REFUSAL.captures(trimmed),
    };
    if let Some(caps) = refusal {
        let reason = caps[1].trim();
        let reason = if reason.is_empty() { "no reason given" } else { reason };
        return Err(BackendError::Refusal(reason.to_string()));
    }

    let candidate = RE_JSON_FENCE
        .captures(trimmed)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| trimmed.to_string());
    if candidate.starts_with('{') {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
            return Ok(RawModelOutput::Structured(value));
        }
    }

    Ok(RawModelOutput::FreeText(content.to_string()))
}

// ── Mock ─────────────────────────────────────────────────────────────────

/// Offline backend returning a fixed structured record.
#[derive(Debug, Default)]
pub struct MockBackend;

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<RawModelOutput, BackendError> {
        let images = request
            .blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::Image { .. }))
            .count();
        Ok(RawModelOutput::Structured(mock_record(images)))
    }
}

fn mock_record(images: usize) -> Value {
    json!({
        "case_summary": format!("Mock analysis of an accident report with {images} image(s); no model was called."),
        "party_a": {
            "name": "Mock Driver A",
            "vehicle_plate": "34 MOCK 001",
            "vehicle_type": "Otomobil"
        },
        "party_b": {
            "name": "Mock Driver B",
            "vehicle_plate": "06 MOCK 002",
            "vehicle_type": "Kamyonet"
        },
        "accident_details": {
            "date": "01.01.2024",
            "time": "12:00",
            "location": "Mock location",
            "traffic_signs": []
        },
        "form_checkboxes": {
            "section_12_selections": [1],
            "section_13_selections": [5]
        },
        "fault_assessment": {
            "party_a_fault_percentage": 50,
            "party_b_fault_percentage": 50,
            "fault_indicators": ["Mock indicator"]
        },
        "recommended_actions": ["Replace mock mode with a configured model"],
        "extraction_confidence": 0.5
    })
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Pick the backend described by the config.
///
/// Mock mode wins; otherwise an `edgequake-llm` provider is resolved, from
/// most to least specific:
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **OpenAI key present** (`OPENAI_API_KEY`)
/// 5. **Full auto-detection** (`ProviderFactory::from_env`)
///
/// A provider that cannot be configured is a transport failure: the run
/// degrades like any other unreachable model.
pub fn resolve_backend(config: &AnalysisConfig) -> Result<Arc<dyn ModelBackend>, BackendError> {
    if config.mock {
        return Ok(Arc::new(MockBackend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmBackend::new(
        provider,
        Duration::from_secs(config.api_timeout_secs),
    )))
}

const DEFAULT_MODEL: &str = "gpt-4.1";

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        BackendError::Transport(format!("provider '{name}' is not configured: {e}"))
    })
}

fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, BackendError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        BackendError::Transport(format!(
            "no model provider could be auto-detected; set OPENAI_API_KEY or ANTHROPIC_API_KEY ({e})"
        ))
    })?;
    Ok(llm_provider)
}
