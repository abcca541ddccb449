//! Router configuration types for IdeaForge.
//!
//! `RouterConfig` represents the top-level `config.toml` plus environment
//! overrides. It is read once at startup and never mutated afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::provider::{CapabilityTier, ModelConfig, ProviderKind};
use crate::request::TaskType;

/// Top-level configuration for the router process.
///
/// All fields have sensible defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Deployment environment name (e.g. "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Pick the cheapest adequate tier for non-critical work.
    #[serde(default = "default_true")]
    pub enable_cost_optimization: bool,

    /// Daily spend cap in USD.
    #[serde(default = "default_daily_budget_limit")]
    pub daily_budget_limit: f64,

    /// Monthly spend cap in USD.
    #[serde(default = "default_monthly_budget_limit")]
    pub monthly_budget_limit: f64,

    /// Redis URL for the shared response cache. In-memory cache when absent.
    #[serde(default)]
    pub cache_url: Option<String>,

    /// SQLite URL for the spend ledger.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSettings>,

    /// Model catalog. Falls back to the built-in catalog when omitted.
    #[serde(default = "default_model_catalog")]
    pub models: Vec<ModelConfig>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}

fn default_daily_budget_limit() -> f64 {
    50.0
}

fn default_monthly_budget_limit() -> f64 {
    1000.0
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            enable_cost_optimization: true,
            daily_budget_limit: default_daily_budget_limit(),
            monthly_budget_limit: default_monthly_budget_limit(),
            cache_url: None,
            database_url: None,
            router: RouterSettings::default(),
            cache: CacheSettings::default(),
            providers: default_providers(),
            models: default_model_catalog(),
        }
    }
}

impl RouterConfig {
    /// Reject configurations the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, limit) in [
            ("daily_budget_limit", self.daily_budget_limit),
            ("monthly_budget_limit", self.monthly_budget_limit),
        ] {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number, got {limit}"
                )));
            }
        }

        if self.router.provider_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "router.provider_timeout_secs must be greater than zero".to_string(),
            ));
        }

        for provider in &self.providers {
            if provider.window_secs == 0
                || provider.requests_per_window == 0
                || provider.tokens_per_window == 0
            {
                return Err(ConfigError::Invalid(format!(
                    "provider {} needs a non-zero window, request and token allowance",
                    provider.kind
                )));
            }
        }

        if self.models.is_empty() {
            return Err(ConfigError::Invalid("model catalog is empty".to_string()));
        }
        for model in &self.models {
            if model.input_cost_per_million < 0.0 || model.output_cost_per_million < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "model {} has a negative price",
                    model.label()
                )));
            }
        }

        for key in self.cache.ttl_overrides.keys() {
            key.parse::<TaskType>().map_err(ConfigError::Invalid)?;
        }

        Ok(())
    }

    /// Settings for one provider, if configured.
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.kind == kind)
    }
}

/// Dispatcher tuning knobs (`[router]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Content length (characters) above which only long-context models qualify.
    #[serde(default = "default_long_context_threshold_chars")]
    pub long_context_threshold_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_long_context_threshold_chars() -> usize {
    100_000
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout_secs(),
            long_context_threshold_chars: default_long_context_threshold_chars(),
            default_max_tokens: default_max_tokens(),
            default_temperature: default_temperature(),
        }
    }
}

impl RouterSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Response cache settings (`[cache]` table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Per-task TTL overrides in seconds, keyed by task type name.
    #[serde(default)]
    pub ttl_overrides: BTreeMap<String, u64>,
}

impl CacheSettings {
    /// TTL for a task type, honoring overrides.
    pub fn ttl_for(&self, task_type: TaskType) -> Duration {
        self.ttl_overrides
            .iter()
            .find(|(key, _)| key.parse::<TaskType>().ok() == Some(task_type))
            .map(|(_, secs)| Duration::from_secs(*secs))
            .unwrap_or_else(|| task_type.default_cache_ttl())
    }
}

/// Per-provider connection and quota settings (`[[providers]]` entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Secret name holding the API key. Defaults to the provider's conventional variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Override the default base URL (useful for proxies and tests).
    #[serde(default)]
    pub base_url: Option<String>,
    pub requests_per_window: u32,
    pub tokens_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_window_secs() -> u64 {
    60
}

impl ProviderSettings {
    pub fn api_key_name(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_providers() -> Vec<ProviderSettings> {
    let entry = |kind, requests_per_window, tokens_per_window| ProviderSettings {
        kind,
        api_key_env: None,
        base_url: None,
        requests_per_window,
        tokens_per_window,
        window_secs: default_window_secs(),
        enabled: true,
    };
    vec![
        entry(ProviderKind::Anthropic, 50, 80_000),
        entry(ProviderKind::OpenAi, 500, 200_000),
        entry(ProviderKind::Gemini, 150, 1_000_000),
    ]
}

/// Built-in model catalog: three tiers across three providers.
///
/// Prices are approximate USD per million tokens.
pub fn default_model_catalog() -> Vec<ModelConfig> {
    let model = |provider, name: &str, input, output, context_window, max_output_tokens, tier| {
        ModelConfig {
            provider,
            model_name: name.to_string(),
            input_cost_per_million: input,
            output_cost_per_million: output,
            context_window,
            max_output_tokens,
            tier,
        }
    };
    use CapabilityTier::{Economy, Premium, Standard};
    use ProviderKind::{Anthropic, Gemini, OpenAi};
    vec![
        // Anthropic
        model(Anthropic, "claude-opus-4-1", 15.0, 75.0, 200_000, 32_000, Premium),
        model(Anthropic, "claude-sonnet-4-5", 3.0, 15.0, 200_000, 64_000, Standard),
        model(Anthropic, "claude-haiku-4-5", 1.0, 5.0, 200_000, 64_000, Economy),
        // OpenAI
        model(OpenAi, "o3", 2.0, 8.0, 200_000, 100_000, Premium),
        model(OpenAi, "gpt-4.1", 2.0, 8.0, 1_047_576, 32_768, Standard),
        model(OpenAi, "gpt-4.1-mini", 0.40, 1.60, 1_047_576, 32_768, Economy),
        // Google
        model(Gemini, "gemini-2.5-pro", 1.25, 10.0, 1_048_576, 65_536, Premium),
        model(Gemini, "gemini-2.5-flash", 0.30, 2.50, 1_048_576, 65_536, Standard),
        model(Gemini, "gemini-2.5-flash-lite", 0.10, 0.40, 1_048_576, 65_536, Economy),
    ]
}
