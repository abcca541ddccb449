//! Shared domain types for IdeaForge.
//!
//! This crate contains the data shapes that flow through the AI request router:
//! router requests and responses, provider/model descriptions, budget and
//! rate-limit snapshots, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod accounting;
pub mod config;
pub mod error;
pub mod provider;
pub mod request;
