//! Secret provider trait definition.

use std::future::Future;

use secrecy::SecretString;

use ideaforge_types::error::RepositoryError;

/// Trait for secret storage backends (environment, files, vaults).
///
/// Provider API keys are resolved through this trait at startup so the
/// router never reads the environment directly.
pub trait SecretProvider: Send + Sync {
    /// Retrieve a secret value by key.
    /// Returns None if the secret does not exist in this provider.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<SecretString>, RepositoryError>> + Send;
}
