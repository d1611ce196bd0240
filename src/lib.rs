//! Alerthub Backend Library
//!
//! Alert-management layer between Prometheus-style producers and
//! incident-response sinks: ingest, dedup, inhibition, silencing, LLM
//! classification behind a two-tier cache, filtering, and parallel fanout
//! to discovered targets. Exposed as a library for the binary and the
//! integration tests.

pub mod api;
pub mod cache;
pub mod circuit;
pub mod classify;
pub mod enrichment_mode;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod rules;
pub mod storage;

pub use api::AppState;
pub use error::PipelineError;
pub use models::{Alert, AlertStatus, Config};
