//! ProviderAdapter trait definition.
//!
//! This is the core abstraction every LLM backend implements. Uses RPITIT
//! for the async methods; `BoxProviderAdapter` erases the type for the
//! registry.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;

use ideaforge_types::provider::{
    Generation, HealthReport, HealthStatus, ModelConfig, ProviderError, ProviderKind, Usage,
};
use ideaforge_types::request::{RouterRequest, TaskType};

/// Rough characters-per-token ratio used for pre-flight estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Completion size assumed when a request carries no `max_tokens`.
pub const FALLBACK_MAX_TOKENS: u32 = 2048;

/// Estimate the token count of a piece of text (ceil of chars / 4).
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

/// Usage inferred from text, for backends that omit their usage block.
pub fn estimate_usage(request: &RouterRequest, completion: &str) -> Usage {
    Usage {
        input_tokens: estimate_tokens(&request.prompt)
            .saturating_add(request.context.as_deref().map_or(0, estimate_tokens)),
        output_tokens: estimate_tokens(completion),
    }
}

/// The completion limit actually sent to a model: the requested limit,
/// clamped to what the model can produce.
pub fn effective_max_tokens(request: &RouterRequest, model: &ModelConfig) -> u32 {
    request
        .max_tokens
        .unwrap_or(FALLBACK_MAX_TOKENS)
        .min(model.max_output_tokens)
}

/// Trait for LLM backends (Anthropic, OpenAI, Gemini).
///
/// Implementations live in ideaforge-infra. Adapters are stateless with
/// respect to routing: they report rate-limit headroom through
/// [`Generation::rate_limit`] and never touch shared quota or budget state.
pub trait ProviderAdapter: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// Send one completion request to `model`.
    ///
    /// Errors are classified by what the backend reported: auth and
    /// malformed-request failures are terminal, 429s and 5xx are transient.
    fn generate(
        &self,
        request: &RouterRequest,
        model: &ModelConfig,
    ) -> impl Future<Output = Result<Generation, ProviderError>> + Send;

    /// Pre-flight cost estimate in USD, computed without a network call.
    ///
    /// Input tokens come from a chars/4 heuristic over prompt and context;
    /// output is assumed to hit the effective `max_tokens`.
    fn estimate_cost(&self, request: &RouterRequest, model: &ModelConfig) -> f64 {
        let input = estimate_usage(request, "").input_tokens;
        model.cost_for(input, effective_max_tokens(request, model))
    }

    /// Issue a minimal, cheap call and report whether the backend answers.
    ///
    /// A rate-limited backend is reachable, so it reports `Degraded`.
    fn health_check(&self, model: &ModelConfig) -> impl Future<Output = HealthReport> + Send {
        async move {
            let ping = RouterRequest::new(TaskType::General, "ping")
                .with_max_tokens(1)
                .with_temperature(0.0);
            let start = Instant::now();
            let result = self.generate(&ping, model).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let (status, error) = match result {
                Ok(_) => (HealthStatus::Healthy, None),
                Err(err @ ProviderError::RateLimited { .. }) => {
                    (HealthStatus::Degraded, Some(err.to_string()))
                }
                Err(err) => (HealthStatus::Unhealthy, Some(err.to_string())),
            };

            HealthReport {
                provider: self.kind(),
                model: model.model_name.clone(),
                status,
                latency_ms,
                error,
                checked_at: Utc::now(),
            }
        }
    }
}
