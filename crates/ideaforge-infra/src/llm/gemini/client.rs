//! GeminiAdapter -- [`ProviderAdapter`] for Google's Generative Language API.
//!
//! Gemini does not send rate-limit headers, so successful calls carry no
//! observation. Two error quirks are handled here:
//! - an invalid key comes back as `400` with reason `API_KEY_INVALID`
//! - a 429 may put its delay in `details[].retryDelay` instead of a header

use std::time::Instant;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use ideaforge_core::provider::{ProviderAdapter, effective_max_tokens, estimate_usage};
use ideaforge_types::error::ConfigError;
use ideaforge_types::provider::{
    FinishReason, Generation, ModelConfig, ProviderError, ProviderKind, Usage,
};
use ideaforge_types::request::RouterRequest;

use super::types::{GeminiContent, GeminiError, GeminiRequest, GeminiResponse, GenerationConfig};
use crate::llm::http;

/// Gemini adapter. No Debug impl; it holds the API key.
pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl GeminiAdapter {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

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

    fn build_request(&self, request: &RouterRequest, model: &ModelConfig) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent::text(Some("user"), request.prompt.clone())],
            system_instruction: request
                .context
                .as_ref()
                .map(|context| GeminiContent::text(None, context.clone())),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: effective_max_tokens(request, model),
            },
        }
    }
}

/// Gemini-specific error classification, falling back to the shared table.
fn classify_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ProviderError {
    let provider = ProviderKind::Gemini;
    let parsed = serde_json::from_str::<GeminiError>(body).ok();

    if status == StatusCode::BAD_REQUEST && body.contains("API_KEY_INVALID") {
        return ProviderError::AuthFailed { provider };
    }

    if status == StatusCode::TOO_MANY_REQUESTS && http::retry_after_ms(headers).is_none() {
        let retry_after_ms = parsed.as_ref().and_then(|err| {
            err.error.details.iter().find_map(|detail| {
                detail
                    .get("retryDelay")
                    .and_then(|v| v.as_str())
                    .and_then(http::parse_duration_ms)
            })
        });
        return ProviderError::RateLimited {
            provider,
            retry_after_ms,
        };
    }

    let message = parsed
        .map(|err| format!("{}: {}", err.error.status, err.error.message))
        .unwrap_or_else(|| body.to_string());
    http::classify_status(provider, status, headers, &message)
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            FinishReason::ContentFilter
        }
        Some(other) => FinishReason::Other(other.to_lowercase()),
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(
        &self,
        request: &RouterRequest,
        model: &ModelConfig,
    ) -> Result<Generation, ProviderError> {
        let provider = ProviderKind::Gemini;
        let body = self.build_request(request, model);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model.model_name
        );
        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let error_body = response.text().await.unwrap_or_default();
            tracing::debug!(status = %status, "Gemini API error response");
            return Err(classify_error(status, &headers, &error_body));
        }

        let gemini_resp: GeminiResponse = response
            .json()
            .await
            .map_err(|e| http::decode_error(provider, e))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let candidate = gemini_resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| http::decode_error(provider, "response has no candidates"))?;
        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        let usage = match gemini_resp.usage_metadata {
            Some(metadata) => Usage {
                input_tokens: metadata.prompt_token_count,
                output_tokens: metadata.candidates_token_count.unwrap_or(0),
            },
            None => {
                tracing::warn!(model = %model.model_name, "Gemini response has no usageMetadata, estimating cost");
                estimate_usage(request, &content)
            }
        };

        Ok(Generation {
            content,
            model: gemini_resp
                .model_version
                .unwrap_or_else(|| model.model_name.clone()),
            tokens_used: usage.total(),
            cost: model.cost_for(usage.input_tokens, usage.output_tokens),
            usage,
            latency_ms,
            finish_reason: finish_reason(candidate.finish_reason.as_deref()),
            rate_limit: None,
        })
    }
}
