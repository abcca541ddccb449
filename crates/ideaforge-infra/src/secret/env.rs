//! Environment variable secret provider.
//!
//! Provider API keys are read from the variable named by each provider's
//! `api_key_env` setting (e.g. `ANTHROPIC_API_KEY`).

use secrecy::SecretString;

use ideaforge_core::secret::SecretProvider;
use ideaforge_types::error::RepositoryError;

/// Read-only secret provider backed by the process environment.
pub struct EnvSecretProvider;

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvider for EnvSecretProvider {
    async fn get(&self, key: &str) -> Result<Option<SecretString>, RepositoryError> {
        match std::env::var(key) {
            Ok(val) if val.trim().is_empty() => Ok(None),
            Ok(val) => Ok(Some(SecretString::from(val))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            // A key must be valid text; treat garbage as unset.
            Err(std::env::VarError::NotUnicode(_)) => Ok(None),
        }
    }
}
