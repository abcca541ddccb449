//! OpenAiAdapter -- [`ProviderAdapter`] for the OpenAI Chat Completions API.
//!
//! Request context becomes a system message ahead of the user prompt.
//! Rate-limit headroom comes from the `x-ratelimit-*` headers, whose reset
//! values are Go-style durations (`6m0s`, `20ms`).

use std::time::Instant;

use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use ideaforge_core::provider::{ProviderAdapter, effective_max_tokens, estimate_usage};
use ideaforge_types::error::ConfigError;
use ideaforge_types::provider::{
    FinishReason, Generation, ModelConfig, ProviderError, ProviderKind, RateLimitObservation,
    Usage,
};
use ideaforge_types::request::RouterRequest;

use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::llm::http;

/// OpenAI adapter. No Debug impl; it holds the API key.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiAdapter {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(api_key: SecretString) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http::build_client()?,
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, request: &RouterRequest, model: &ModelConfig) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(context) = &request.context {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(context.clone()),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(request.prompt.clone()),
        });

        ChatCompletionRequest {
            model: model.model_name.clone(),
            messages,
            max_completion_tokens: effective_max_tokens(request, model),
            temperature: request
                .temperature
                .filter(|_| accepts_temperature(&model.model_name)),
        }
    }
}

/// Reasoning models (`o1`, `o3`, `o4-mini`, the `gpt-5` family) reject any
/// `temperature` other than the default, so it is left out for them.
fn accepts_temperature(model_name: &str) -> bool {
    let mut chars = model_name.chars();
    let reasoning = match chars.next() {
        Some('o') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => model_name.starts_with("gpt-5"),
    };
    !reasoning
}

fn rate_limit_observation(headers: &HeaderMap) -> RateLimitObservation {
    let reset = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(http::parse_duration_ms)
    };
    RateLimitObservation {
        requests_remaining: http::header_u32(headers, "x-ratelimit-remaining-requests"),
        tokens_remaining: http::header_u32(headers, "x-ratelimit-remaining-tokens"),
        reset_after_ms: reset("x-ratelimit-reset-requests").max(reset("x-ratelimit-reset-tokens")),
    }
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn generate(
        &self,
        request: &RouterRequest,
        model: &ModelConfig,
    ) -> Result<Generation, ProviderError> {
        let provider = ProviderKind::OpenAi;
        let body = self.build_request(request, model);
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(provider, e))?;

        let status = response.status();
        let observation = rate_limit_observation(response.headers());
        if !status.is_success() {
            let headers = response.headers().clone();
            let error_body = response.text().await.unwrap_or_default();
            let err = http::classify_status(provider, status, &headers, &error_body);
            return Err(http::with_reset_hint(err, observation.reset_after_ms));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| http::decode_error(provider, e))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| http::decode_error(provider, "response has no choices"))?;
        let content = choice.message.content.unwrap_or_default();
        let usage = match completion.usage {
            Some(u) => Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            },
            None => {
                tracing::warn!(model = %model.model_name, "OpenAI response has no usage, estimating cost");
                estimate_usage(request, &content)
            }
        };

        Ok(Generation {
            content,
            model: completion.model,
            tokens_used: usage.total(),
            cost: model.cost_for(usage.input_tokens, usage.output_tokens),
            usage,
            latency_ms,
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
            rate_limit: (!observation.is_empty()).then_some(observation),
        })
    }
}
