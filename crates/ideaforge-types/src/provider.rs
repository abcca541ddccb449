//! Provider and model types for IdeaForge.
//!
//! These types describe the LLM backends the router can dispatch to:
//! which provider, which model, what it costs, and what it reports back
//! after a call (usage, finish reason, rate-limit headroom).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of LLM backends the router knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Every provider kind, in display order.
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
    ];

    /// Environment variable that conventionally holds this provider's API key.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(format!("invalid provider: '{other}'")),
        }
    }
}

/// Ranked class of models used for budget-aware downgrading.
///
/// Ordering is meaningful: `Economy < Standard < Premium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTier {
    Economy,
    Standard,
    Premium,
}

impl CapabilityTier {
    /// All tiers, lowest first.
    pub const ALL: [CapabilityTier; 3] = [
        CapabilityTier::Economy,
        CapabilityTier::Standard,
        CapabilityTier::Premium,
    ];

    /// The tier directly below this one, if any.
    pub fn lower(&self) -> Option<CapabilityTier> {
        match self {
            CapabilityTier::Premium => Some(CapabilityTier::Standard),
            CapabilityTier::Standard => Some(CapabilityTier::Economy),
            CapabilityTier::Economy => None,
        }
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityTier::Economy => write!(f, "economy"),
            CapabilityTier::Standard => write!(f, "standard"),
            CapabilityTier::Premium => write!(f, "premium"),
        }
    }
}

impl FromStr for CapabilityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "economy" => Ok(CapabilityTier::Economy),
            "standard" => Ok(CapabilityTier::Standard),
            "premium" => Ok(CapabilityTier::Premium),
            other => Err(format!("invalid capability tier: '{other}'")),
        }
    }
}

/// Static description of one provider+model pair in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model_name: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
    /// Total context window in tokens (input + output).
    pub context_window: u32,
    /// Largest completion the model will produce in one call.
    pub max_output_tokens: u32,
    pub tier: CapabilityTier,
}

impl ModelConfig {
    /// Price a call given its token counts.
    pub fn cost_for(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input = f64::from(input_tokens) / 1_000_000.0 * self.input_cost_per_million;
        let output = f64::from(output_tokens) / 1_000_000.0 * self.output_cost_per_million;
        input + output
    }

    /// `provider/model` label used in logs and route decisions.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model_name)
    }
}

/// Token usage reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Provider-neutral view of the rate-limit headers a backend returned.
///
/// Each adapter parses its own backend's header format into this shape;
/// the router merges it into the per-provider rate-limit state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitObservation {
    pub requests_remaining: Option<u32>,
    pub tokens_remaining: Option<u32>,
    /// Milliseconds until the backend's window resets.
    pub reset_after_ms: Option<u64>,
}

impl RateLimitObservation {
    pub fn is_empty(&self) -> bool {
        self.requests_remaining.is_none()
            && self.tokens_remaining.is_none()
            && self.reset_after_ms.is_none()
    }
}

/// Successful output of a provider adapter call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    /// Model identifier as echoed by the backend.
    pub model: String,
    pub usage: Usage,
    pub tokens_used: u32,
    /// Cost of this call in USD, priced from the catalog entry.
    pub cost: f64,
    pub latency_ms: u64,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitObservation>,
}

/// Coarse health classification from a provider health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Reachable, but currently refusing work (rate limited).
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of a single provider health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub provider: ProviderKind,
    pub model: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Errors from provider adapter calls.
///
/// Classified strictly by what the backend reported. `AuthFailed` and
/// `BadRequest` are terminal; `RateLimited` and `ServerError` are transient.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited {
        provider: ProviderKind,
        retry_after_ms: Option<u64>,
    },

    #[error("{provider} authentication failed")]
    AuthFailed { provider: ProviderKind },

    #[error("{provider} rejected the request: {message}")]
    BadRequest {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} server error: {message}")]
    ServerError {
        provider: ProviderKind,
        message: String,
    },
}

impl ProviderError {
    /// The provider that produced this error.
    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::RateLimited { provider, .. }
            | ProviderError::AuthFailed { provider }
            | ProviderError::BadRequest { provider, .. }
            | ProviderError::ServerError { provider, .. } => *provider,
        }
    }

    /// Whether the fallback chain may advance past this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::ServerError { .. }
        )
    }
}
