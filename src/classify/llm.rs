//! External LLM client for alert classification.
//!
//! Speaks the OpenAI-compatible chat-completions shape over reqwest. The
//! call is wrapped by a circuit breaker and bounded retries with jittered
//! exponential backoff; every failure path degrades to the rule fallback in
//! the service layer, never to an ingest error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::circuit::CircuitBreaker;
use crate::metrics::PipelineMetrics;
use crate::models::{Alert, ClassificationConfig, ClassificationResult, ClassificationSource};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Shape the model is asked to emit.
#[derive(Debug, Deserialize)]
struct LlmVerdict {
    severity: String,
    category: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
}

const SYSTEM_PROMPT: &str = "You are an SRE triage assistant. Classify the \
alert you are given. Respond with a single JSON object with keys: severity \
(critical|warning|info), category (short kebab-case string), confidence \
(0.0-1.0), reasoning (one sentence), tags (array of strings), action_items \
(array of strings). No prose outside the JSON.";

pub struct LlmClient {
    http: Client,
    api_url: String,
    model: String,
    max_retries: u32,
    circuit: CircuitBreaker,
    metrics: Arc<PipelineMetrics>,
}

impl LlmClient {
    pub fn new(config: &ClassificationConfig, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        let api_key = config
            .llm_api_key
            .clone()
            .ok_or_else(|| anyhow!("LLM_API_KEY not configured"))?;

        let http = Client::builder()
            .timeout(config.llm_timeout)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", api_key)
                        .parse()
                        .context("Invalid LLM api key")?,
                );
                headers
            })
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self {
            http,
            api_url: config.llm_api_url.clone(),
            model: config.llm_model.clone(),
            max_retries: config.llm_max_retries,
            circuit: CircuitBreaker::new(
                "llm",
                config.circuit_failure_threshold,
                config.circuit_cooldown,
            ),
            metrics,
        })
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// One classification call with retries. Errors mean "use the fallback";
    /// they are never propagated to the producer.
    pub async fn classify(&self, alert: &Alert) -> Result<ClassificationResult> {
        if !self.circuit.allow_request() {
            self.metrics
                .classification
                .llm_calls_total
                .incr("circuit_open");
            return Err(anyhow!("LLM circuit open"));
        }

        let mut attempt = 0u32;
        loop {
            match self.call_once(alert).await {
                Ok(result) => {
                    self.circuit.record_success();
                    self.metrics.classification.llm_calls_total.incr("ok");
                    return Ok(result);
                }
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let backoff = backoff_with_jitter(attempt);
                    debug!(error = %e, attempt, backoff_ms = backoff.as_millis() as u64,
                        "LLM call failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.circuit.record_failure();
                    // {:#} renders the whole context chain, the reqwest
                    // timeout marker included.
                    let result_label = if format!("{e:#}").contains("timed out") {
                        "timeout"
                    } else {
                        "error"
                    };
                    self.metrics
                        .classification
                        .llm_calls_total
                        .incr(result_label);
                    warn!(error = %e, "LLM classification failed");
                    return Err(e);
                }
            }
        }
    }

    async fn call_once(&self, alert: &Alert) -> Result<ClassificationResult> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
            "messages": [
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: build_prompt(alert) },
            ],
        });

        let resp = self
            .http
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("LLM returned {status}: {text}"));
        }

        let parsed: ChatResponse = resp.json().await.context("Failed to parse LLM response")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("LLM response had no choices"))?;

        let verdict: LlmVerdict =
            serde_json::from_str(content).context("LLM emitted non-JSON verdict")?;

        Ok(ClassificationResult {
            severity: verdict.severity,
            category: verdict.category,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            reasoning: verdict.reasoning,
            tags: verdict.tags,
            action_items: verdict.action_items,
            source: ClassificationSource::Llm,
            classified_at: Utc::now(),
        })
    }
}

fn build_prompt(alert: &Alert) -> String {
    let labels = serde_json::to_string(&alert.labels).unwrap_or_default();
    let annotations = serde_json::to_string(&alert.annotations).unwrap_or_default();
    format!(
        "Alert name: {}\nStatus: {}\nLabels: {}\nAnnotations: {}",
        alert.name(),
        alert.status,
        labels,
        annotations
    )
}

/// 4xx answers (other than 429) are configuration problems; retrying wastes
/// the budget.
fn is_retryable(e: &anyhow::Error) -> bool {
    let msg = format!("{e:#}");
    if msg.contains("LLM returned 4") && !msg.contains("LLM returned 429") {
        return false;
    }
    true
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 250u64.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..base_ms / 2 + 1);
    Duration::from_millis((base_ms + jitter).min(10_000))
}
