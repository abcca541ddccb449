//! Provider adapter abstractions.
//!
//! - `ProviderAdapter`: RPITIT trait each LLM backend implements
//! - `BoxProviderAdapter`: object-safe wrapper for dynamic dispatch
//! - `ProviderRegistry`: adapters keyed by `ProviderKind`

pub mod adapter;
pub mod box_adapter;
pub mod registry;

pub use adapter::{ProviderAdapter, effective_max_tokens, estimate_tokens, estimate_usage};
pub use box_adapter::BoxProviderAdapter;
pub use registry::ProviderRegistry;
