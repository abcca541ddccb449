//! Observability setup for IdeaForge: the tracing subscriber and optional
//! OpenTelemetry span export.

pub mod tracing_setup;

pub use tracing_setup::{filter_directive, init_tracing, shutdown_tracing};
