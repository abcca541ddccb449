use thiserror::Error;

use crate::provider::{ProviderError, ProviderKind};

/// One failed or skipped candidate in a fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub provider: ProviderKind,
    pub model: String,
    pub error: ProviderError,
    /// True when the candidate was skipped on local quota without a network call.
    pub skipped_locally: bool,
}

fn summarize_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| {
            if a.skipped_locally {
                format!("{}/{}: skipped (local quota exhausted)", a.provider, a.model)
            } else {
                format!("{}/{}: {}", a.provider, a.model, a.error)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by `Router::route`.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A terminal provider error (auth or bad request). Never retried.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(
        "budget exceeded: utilization {:.0}% (daily ${daily_spend:.2}/${daily_limit:.2}, monthly ${monthly_spend:.2}/${monthly_limit:.2})",
        .utilization * 100.0
    )]
    BudgetExceeded {
        utilization: f64,
        daily_spend: f64,
        daily_limit: f64,
        monthly_spend: f64,
        monthly_limit: f64,
    },

    #[error("all providers exhausted: {}", summarize_attempts(.attempts))]
    AllProvidersExhausted { attempts: Vec<AttemptFailure> },

    #[error("no model can serve this request: {0}")]
    NoCandidates(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled")]
    Cancelled,
}

impl RouterError {
    /// For `AllProvidersExhausted`: whether every attempt failed on rate limits.
    pub fn all_rate_limited(&self) -> bool {
        match self {
            RouterError::AllProvidersExhausted { attempts } => {
                !attempts.is_empty()
                    && attempts
                        .iter()
                        .all(|a| matches!(a.error, ProviderError::RateLimited { .. }))
            }
            _ => false,
        }
    }

    /// For `AllProvidersExhausted`: whether every attempt failed with a server error.
    pub fn all_server_errors(&self) -> bool {
        match self {
            RouterError::AllProvidersExhausted { attempts } => {
                !attempts.is_empty()
                    && attempts
                        .iter()
                        .all(|a| matches!(a.error, ProviderError::ServerError { .. }))
            }
            _ => false,
        }
    }
}

/// Errors from response cache backends. Always non-fatal to routing.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry corrupt: {0}")]
    Corrupt(String),
}

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
}

/// Errors from repository operations (spend ledger, secrets).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(error: ProviderError, skipped_locally: bool) -> AttemptFailure {
        AttemptFailure {
            provider: error.provider(),
            model: "m".to_string(),
            error,
            skipped_locally,
        }
    }

    #[test]
    fn test_exhausted_aggregates_reasons() {
        let err = RouterError::AllProvidersExhausted {
            attempts: vec![
                attempt(
                    ProviderError::RateLimited {
                        provider: ProviderKind::Anthropic,
                        retry_after_ms: None,
                    },
                    true,
                ),
                attempt(
                    ProviderError::ServerError {
                        provider: ProviderKind::OpenAi,
                        message: "HTTP 503".to_string(),
                    },
                    false,
                ),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("anthropic/m: skipped"), "{msg}");
        assert!(msg.contains("openai server error: HTTP 503"), "{msg}");
        assert!(!err.all_rate_limited());
        assert!(!err.all_server_errors());
    }

    #[test]
    fn test_all_rate_limited() {
        let err = RouterError::AllProvidersExhausted {
            attempts: vec![attempt(
                ProviderError::RateLimited {
                    provider: ProviderKind::Gemini,
                    retry_after_ms: Some(500),
                },
                false,
            )],
        };
        assert!(err.all_rate_limited());
        assert!(!RouterError::Cancelled.all_rate_limited());
    }

    #[test]
    fn test_budget_exceeded_display() {
        let err = RouterError::BudgetExceeded {
            utilization: 1.2,
            daily_spend: 60.0,
            daily_limit: 50.0,
            monthly_spend: 100.0,
            monthly_limit: 1000.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("120%"), "{msg}");
        assert!(msg.contains("$60.00/$50.00"), "{msg}");
    }

    #[test]
    fn test_provider_error_is_transparent() {
        let err: RouterError = ProviderError::AuthFailed {
            provider: ProviderKind::OpenAi,
        }
        .into();
        assert_eq!(err.to_string(), "openai authentication failed");
    }
}
