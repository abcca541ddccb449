//! AnthropicAdapter -- concrete [`ProviderAdapter`] for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`). Request
//! context travels in the `system` field; the prompt is the single user turn.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use ideaforge_core::provider::{ProviderAdapter, effective_max_tokens};
use ideaforge_types::error::ConfigError;
use ideaforge_types::provider::{
    FinishReason, Generation, ModelConfig, ProviderError, ProviderKind, RateLimitObservation,
    Usage,
};
use ideaforge_types::request::RouterRequest;

use super::types::{AnthropicContentBlock, AnthropicMessage, AnthropicRequest, AnthropicResponse};
use crate::llm::http;

const MAX_TEMPERATURE: f64 = 1.0;

/// Anthropic Claude adapter.
///
/// Does not derive Debug, so the key cannot leak through `{:?}`.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl AnthropicAdapter {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    /// Create a new Anthropic adapter against the public API.
    pub fn new(api_key: SecretString) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http::build_client()?,
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Override the base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn to_anthropic_request(&self, request: &RouterRequest, model: &ModelConfig) -> AnthropicRequest {
        AnthropicRequest {
            model: model.model_name.clone(),
            max_tokens: effective_max_tokens(request, model),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            system: request.context.clone(),
            // Anthropic accepts 0.0..=1.0; the router allows up to 2.0.
            temperature: request.temperature.map(|t| t.clamp(0.0, MAX_TEMPERATURE)),
        }
    }
}

/// Read `anthropic-ratelimit-*` headers. The reset header is an RFC 3339
/// instant; of the request and token resets, the later one wins.
fn rate_limit_observation(headers: &HeaderMap, now: DateTime<Utc>) -> RateLimitObservation {
    let reset = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| http::rfc3339_delay_ms(v, now))
    };
    RateLimitObservation {
        requests_remaining: http::header_u32(headers, "anthropic-ratelimit-requests-remaining"),
        tokens_remaining: http::header_u32(headers, "anthropic-ratelimit-tokens-remaining"),
        reset_after_ms: reset("anthropic-ratelimit-requests-reset")
            .max(reset("anthropic-ratelimit-tokens-reset")),
    }
}

fn finish_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        None | Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(
        &self,
        request: &RouterRequest,
        model: &ModelConfig,
    ) -> Result<Generation, ProviderError> {
        let provider = ProviderKind::Anthropic;
        let body = self.to_anthropic_request(request, model);
        let start = Instant::now();

        let response = self
            .client
            .post(self.url("/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(provider, e))?;

        let status = response.status();
        let observation = rate_limit_observation(response.headers(), Utc::now());
        if !status.is_success() {
            let headers = response.headers().clone();
            let error_body = response.text().await.unwrap_or_default();
            let err = http::classify_status(provider, status, &headers, &error_body);
            return Err(http::with_reset_hint(err, observation.reset_after_ms));
        }

        let anthropic_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| http::decode_error(provider, e))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let content = anthropic_resp
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                AnthropicContentBlock::Other => None,
            })
            .collect::<String>();

        let usage = Usage {
            input_tokens: anthropic_resp.usage.input_tokens,
            output_tokens: anthropic_resp.usage.output_tokens,
        };

        Ok(Generation {
            content,
            model: anthropic_resp.model,
            tokens_used: usage.total(),
            cost: model.cost_for(usage.input_tokens, usage.output_tokens),
            usage,
            latency_ms,
            finish_reason: finish_reason(anthropic_resp.stop_reason.as_deref()),
            rate_limit: (!observation.is_empty()).then_some(observation),
        })
    }
}
