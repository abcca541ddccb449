//! OpenAI adapter for the Chat Completions API.

pub mod client;
pub mod types;

pub use client::OpenAiAdapter;
