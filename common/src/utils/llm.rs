use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::utils::config::AppConfig;

/// The two operations the kernel needs from a language model. The router is
/// the production implementation; tests inject stubs through this trait.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One-shot prompt expected to yield JSON.
    async fn extract_json(
        &self,
        prompt: &str,
        deadline: Duration,
    ) -> Result<serde_json::Value, AppError>;

    /// Free-form generation with a system instruction.
    async fn generate(
        &self,
        system: &str,
        user: &str,
        deadline: Duration,
    ) -> Result<String, AppError>;
}

struct Provider {
    name: String,
    client: Client<OpenAIConfig>,
    model: String,
}

/// Single canonical router over OpenAI-compatible providers. The preferred
/// provider is tried first; fallbacks follow in configuration order. LLM
/// errors are never retried against the same provider.
pub struct LlmRouter {
    providers: Vec<Provider>,
}

impl LlmRouter {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut providers = vec![Provider {
            name: "preferred".to_string(),
            client: Client::with_config(
                OpenAIConfig::new()
                    .with_api_key(&config.openai_api_key)
                    .with_api_base(&config.openai_base_url),
            ),
            model: config.processing_model.clone(),
        }];

        for fallback in &config.llm_fallbacks {
            providers.push(Provider {
                name: fallback.name.clone(),
                client: Client::with_config(
                    OpenAIConfig::new()
                        .with_api_key(&fallback.api_key)
                        .with_api_base(&fallback.base_url),
                ),
                model: fallback.model.clone(),
            });
        }

        Self { providers }
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        deadline: Duration,
    ) -> Result<String, AppError> {
        let mut last_error: Option<AppError> = None;

        for provider in &self.providers {
            let request = CreateChatCompletionRequestArgs::default()
                .model(&provider.model)
                .messages([
                    ChatCompletionRequestSystemMessage::from(system).into(),
                    ChatCompletionRequestUserMessage::from(user).into(),
                ])
                .build()?;

            let chat = provider.client.chat();
            let call = chat.create(request);
            match tokio::time::timeout(deadline, call).await {
                Ok(Ok(response)) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|choice| choice.message.content.clone());
                    if let Some(content) = content {
                        debug!(provider = %provider.name, "LLM call succeeded");
                        return Ok(content);
                    }
                    last_error = Some(AppError::LLMParsing(
                        "No content found in LLM response".into(),
                    ));
                }
                Ok(Err(err)) => {
                    warn!(provider = %provider.name, error = %err, "LLM provider failed");
                    last_error = Some(AppError::OpenAI(err));
                }
                Err(_) => {
                    warn!(provider = %provider.name, "LLM call hit its deadline");
                    last_error = Some(AppError::LLMUnavailable(format!(
                        "provider {} timed out after {:?}",
                        provider.name, deadline
                    )));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::LLMUnavailable("no LLM providers configured".into())))
    }
}

/// Pull the first JSON value out of a model response. Models wrap JSON in
/// prose or code fences often enough that a plain parse is not sufficient.
pub fn parse_json_response(content: &str) -> Result<serde_json::Value, AppError> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Ok(value);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Some(slice) = trimmed.get(start..=end) {
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(slice) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    Err(AppError::LLMParsing(format!(
        "response is not JSON: {}",
        trimmed.chars().take(120).collect::<String>()
    )))
}

#[async_trait]
impl LanguageModel for LlmRouter {
    async fn extract_json(
        &self,
        prompt: &str,
        deadline: Duration,
    ) -> Result<serde_json::Value, AppError> {
        let content = self
            .chat(
                "You are a precise extraction engine. Respond with JSON only, no prose.",
                prompt,
                deadline,
            )
            .await?;

        parse_json_response(&content)
    }

    async fn generate(
        &self,
        system: &str,
        user: &str,
        deadline: Duration,
    ) -> Result<String, AppError> {
        self.chat(system, user, deadline).await
    }
}
