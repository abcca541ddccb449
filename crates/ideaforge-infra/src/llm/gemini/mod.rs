//! Google Gemini adapter for the `generateContent` API.

pub mod client;
pub mod types;

pub use client::GeminiAdapter;
