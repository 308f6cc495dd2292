pub mod types;

pub mod anthropic;
pub mod openai;

mod error;

pub use error::ProviderError;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;
use tac_config::{Config, LlmConfig, LlmRole};

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

fn conventional_env_var(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        "deepseek" => "DEEPSEEK_API_KEY",
        _ => "OPENAI_API_KEY",
    }
}

fn resolve_api_key(llm: &LlmConfig) -> Result<String> {
    if let Some(key) = &llm.api_key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }
    let var = conventional_env_var(&llm.provider);
    std::env::var(var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::MissingApiKey(llm.provider.clone()).into())
}

/// Construct the provider backing one LLM role. Anything that is not
/// Anthropic speaks the OpenAI chat-completions dialect, so unknown
/// providers with an explicit base_url still work.
pub fn create_provider(role: LlmRole, config: &Config) -> Result<Box<dyn Provider>> {
    let llm = config.llm(role);
    let api_key = resolve_api_key(llm)?;
    let timeout = llm.settings.timeout;

    match llm.provider.as_str() {
        "anthropic" => Ok(Box::new(anthropic::AnthropicProvider::new(
            api_key,
            llm.base_url.clone(),
            llm.model.clone(),
            timeout,
        ))),
        "openai" | "deepseek" => Ok(Box::new(openai::OpenAIProvider::new(
            api_key,
            llm.base_url.clone(),
            llm.model.clone(),
            timeout,
        ))),
        other => {
            if llm.base_url.is_some() {
                tracing::debug!(provider = other, "treating provider as OpenAI-compatible");
                Ok(Box::new(openai::OpenAIProvider::new(
                    api_key,
                    llm.base_url.clone(),
                    llm.model.clone(),
                    timeout,
                )))
            } else {
                Err(ProviderError::UnknownProvider(other.to_string()).into())
            }
        }
    }
}

/// Role-bound convenience handle used throughout the kernel: one provider,
/// one model, one temperature, taken from the role's config section.
pub struct LlmClient {
    provider: Box<dyn Provider>,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl LlmClient {
    pub fn new(role: LlmRole, config: &Config) -> Result<Self> {
        let llm = config.llm(role);
        Ok(Self {
            provider: create_provider(role, config)?,
            model: llm.model.clone(),
            temperature: llm.settings.temperature,
            max_tokens: llm.settings.max_tokens,
        })
    }

    /// Test seam: wrap an arbitrary provider without touching config.
    pub fn from_provider(provider: Box<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn chat_completion(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            system: None,
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
        };
        let response = self.provider.chat(&request).await?;
        Ok(response.content)
    }
}

/// Strip a leading/trailing markdown code fence from an LLM response.
/// Returns the input unchanged when it is not fenced.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match body.split_once('\n') {
        Some((first_line, remainder))
            if first_line.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            remainder.trim()
        }
        _ => body.trim(),
    }
}
