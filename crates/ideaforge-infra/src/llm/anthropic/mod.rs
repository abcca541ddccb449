//! Anthropic Claude adapter.
//!
//! Talks to the Anthropic Messages API (`/v1/messages`) and reports the
//! `anthropic-ratelimit-*` headers back to the router.

pub mod client;
pub mod types;

pub use client::AnthropicAdapter;
