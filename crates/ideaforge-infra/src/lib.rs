//! Infrastructure layer for IdeaForge.
//!
//! Contains implementations of the ports defined in `ideaforge-core`:
//! HTTP adapters for Anthropic, OpenAI and Gemini, the environment secret
//! provider, the Redis response cache, and the SQLite spend ledger. Also
//! owns loading `config.toml` and its environment overrides.

pub mod cache;
pub mod config;
pub mod llm;
pub mod secret;
pub mod sqlite;
