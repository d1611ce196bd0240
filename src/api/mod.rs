//! HTTP surface: ingest, mode endpoints, inhibition tooling, target
//! management, history queries, metrics exposition.

pub mod history_api;
pub mod ingest_api;
pub mod inhibition_api;
pub mod mode_api;
pub mod routes;
pub mod targets_api;

use std::sync::Arc;

use crate::metrics::PipelineMetrics;
use crate::models::Config;
use crate::pipeline::AlertPipeline;
use crate::publish::TargetDiscovery;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AlertPipeline>,
    pub discovery: Arc<TargetDiscovery>,
    pub metrics: Arc<PipelineMetrics>,
    pub config: Arc<Config>,
}
