//! LLM provider adapters.
//!
//! Concrete implementations of the [`ProviderAdapter`] trait defined in
//! `ideaforge-core`, one per backend, plus a factory that turns the
//! `[[providers]]` config section into boxed adapters.

pub mod anthropic;
pub mod gemini;
mod http;
pub mod openai;

use secrecy::SecretString;
use tracing::{debug, warn};

use ideaforge_core::provider::{BoxProviderAdapter, ProviderAdapter};
use ideaforge_core::secret::SecretProvider;
use ideaforge_types::config::{ProviderSettings, RouterConfig};
use ideaforge_types::error::ConfigError;
use ideaforge_types::provider::ProviderKind;

use self::anthropic::AnthropicAdapter;
use self::gemini::GeminiAdapter;
use self::openai::OpenAiAdapter;

/// Create a [`BoxProviderAdapter`] for one `[[providers]]` entry.
///
/// `base_url` from the settings overrides the vendor's public endpoint.
pub fn create_adapter(
    settings: &ProviderSettings,
    api_key: SecretString,
) -> Result<BoxProviderAdapter, ConfigError> {
    fn boxed<T: ProviderAdapter + 'static>(adapter: T) -> BoxProviderAdapter {
        BoxProviderAdapter::new(adapter)
    }

    let base_url = settings.base_url.as_deref();
    Ok(match settings.kind {
        ProviderKind::Anthropic => {
            let adapter = AnthropicAdapter::new(api_key)?;
            boxed(match base_url {
                Some(url) => adapter.with_base_url(url),
                None => adapter,
            })
        }
        ProviderKind::OpenAi => {
            let adapter = OpenAiAdapter::new(api_key)?;
            boxed(match base_url {
                Some(url) => adapter.with_base_url(url),
                None => adapter,
            })
        }
        ProviderKind::Gemini => {
            let adapter = GeminiAdapter::new(api_key)?;
            boxed(match base_url {
                Some(url) => adapter.with_base_url(url),
                None => adapter,
            })
        }
    })
}

/// Build adapters for every enabled provider whose API key resolves.
///
/// A provider without a key is skipped with a warning. Having no usable
/// provider at all is a configuration error.
pub async fn create_adapters<S: SecretProvider>(
    config: &RouterConfig,
    secrets: &S,
) -> Result<Vec<BoxProviderAdapter>, ConfigError> {
    let mut adapters = Vec::new();
    for settings in &config.providers {
        if !settings.enabled {
            debug!(provider = %settings.kind, "provider disabled in config, skipping");
            continue;
        }

        let key_name = settings.api_key_name();
        let key = match secrets.get(key_name).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                warn!(provider = %settings.kind, key = key_name, "API key not set, provider unavailable");
                continue;
            }
            Err(e) => {
                warn!(provider = %settings.kind, key = key_name, error = %e, "failed to read API key, provider unavailable");
                continue;
            }
        };
        adapters.push(create_adapter(settings, key)?);
    }

    if adapters.is_empty() {
        let names: Vec<&str> = config
            .providers
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.api_key_name())
            .collect();
        return Err(ConfigError::Invalid(format!(
            "no LLM provider available; set one of: {}",
            names.join(", ")
        )));
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use ideaforge_types::error::RepositoryError;

    struct MapSecrets(HashMap<&'static str, &'static str>);

    impl SecretProvider for MapSecrets {
        async fn get(&self, key: &str) -> Result<Option<SecretString>, RepositoryError> {
            Ok(self.0.get(key).map(|v| SecretString::from(*v)))
        }
    }

    #[tokio::test]
    async fn test_create_adapters_skips_missing_keys() {
        let config = RouterConfig::default();
        let secrets = MapSecrets(HashMap::from([("OPENAI_API_KEY", "sk-test")]));

        let adapters = create_adapters(&config, &secrets).await.unwrap();
        let kinds: Vec<_> = adapters.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![ProviderKind::OpenAi]);
    }

    #[tokio::test]
    async fn test_create_adapters_respects_enabled_flag() {
        let mut config = RouterConfig::default();
        for settings in &mut config.providers {
            settings.enabled = settings.kind == ProviderKind::Gemini;
        }
        let secrets = MapSecrets(HashMap::from([
            ("ANTHROPIC_API_KEY", "a"),
            ("OPENAI_API_KEY", "o"),
            ("GEMINI_API_KEY", "g"),
        ]));

        let adapters = create_adapters(&config, &secrets).await.unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].kind(), ProviderKind::Gemini);
    }

    #[tokio::test]
    async fn test_no_keys_is_an_error() {
        let err = create_adapters(&RouterConfig::default(), &MapSecrets(HashMap::new()))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ANTHROPIC_API_KEY"), "{msg}");
        assert!(msg.contains("GEMINI_API_KEY"), "{msg}");
    }

    #[test]
    fn test_create_adapter_matches_kind() {
        for kind in ProviderKind::ALL {
            let settings = RouterConfig::default().provider(kind).unwrap().clone();
            let adapter = create_adapter(&settings, SecretString::from("k")).unwrap();
            assert_eq!(adapter.kind(), kind);
        }
    }
}
