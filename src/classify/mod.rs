//! Alert classification: external LLM behind a two-tier cache, with a
//! rule-based fallback that always produces an answer.

pub mod fallback;
pub mod llm;
pub mod service;

pub use fallback::FallbackClassifier;
pub use llm::LlmClient;
pub use service::ClassificationService;
