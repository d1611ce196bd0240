//! Alert processing pipeline: dedup -> inhibition -> silencing -> mode gate
//! -> classification -> filter -> publish.

pub mod dedup;
pub mod filters;
pub mod inhibition;
pub mod processor;
pub mod silencing;

pub use dedup::{DedupOutcome, Deduplicator};
pub use filters::{FilterDecision, FilterEngine};
pub use inhibition::{ActiveAlertSet, InhibitionEngine, InhibitionOutcome};
pub use processor::AlertPipeline;
pub use silencing::{SilenceEngine, SilenceOutcome};
