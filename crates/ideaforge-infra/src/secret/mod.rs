//! Secret provider implementations.

pub mod env;

pub use env::EnvSecretProvider;
