//! The model-client boundary: one image plus instructions in, text out.
//!
//! [`VisionClient`] is the strategy seam between the pipeline and whatever
//! answers vision requests. [`LlmVisionClient`] talks to a real provider
//! through `edgequake-llm`; [`super::StubVisionClient`] answers from a table.
//! The choice is made once, when the session is built.
//!
//! Retries and authentication belong to the provider client, never to this
//! crate: every request that reaches [`VisionClient::complete`] has already
//! been charged to the cost guard exactly once.

use crate::config::ExtractionConfig;
use crate::error::{PageError, Pdf2FactsError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One vision request for one page.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub page: usize,
    pub total_pages: usize,
    pub image: ImageData,
    pub system_prompt: String,
    pub instruction: String,
}

/// Raw model reply plus token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisionReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that can answer a [`VisionRequest`].
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Issue exactly one request. Transport and provider failures come back
    /// as [`PageError::ExtractionFailed`].
    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, PageError>;
}

/// [`VisionClient`] backed by an `edgequake-llm` provider.
pub struct LlmVisionClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmVisionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, Pdf2FactsError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config.temperature, config.max_tokens))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VisionClient for LlmVisionClient {
    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, PageError> {
        let page = request.page;
        let messages = vec![
            ChatMessage::system(&request.system_prompt),
            ChatMessage::user_with_images(&request.instruction, vec![request.image]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| PageError::ExtractionFailed {
                page,
                detail: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page, response.prompt_tokens, response.completion_tokens
        );
        Ok(VisionReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2FactsError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2FactsError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` with `config.model` (default `gpt-4.1-nano`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. OpenAI, when `OPENAI_API_KEY` is set
/// 5. `ProviderFactory::from_env` auto-detection
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2FactsError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2FactsError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
