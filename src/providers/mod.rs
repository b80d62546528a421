//! Provider clients and concurrent fan-out
//!
//! Every configured provider receives the identical evidence packet.
//! Calls run concurrently, each independently retried; one provider's
//! failure never blocks another. The fan-out settles only when every
//! provider has succeeded or exhausted its retries.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use crate::error::IndexError;
use crate::models::{ModelScore, ProviderUsage};
use crate::response;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::Result;
use chrono::Utc;
use std::env;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Shared system instruction; the packet itself carries the full task.
pub(crate) const SYSTEM_PROMPT: &str = "You are a careful, skeptical analyst. \
Follow the output contract exactly and respond with JSON only.";

/// Raw completion from one provider plus its token accounting.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

/// One LLM provider able to judge an evidence packet.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<ProviderReply>;
}

/// Everything the fan-out produced once all providers settled.
#[derive(Debug)]
pub struct FanOut {
    /// Valid judgments, one per provider that succeeded.
    pub scores: Vec<ModelScore>,
    /// Telemetry for every provider, including synthetic failure rows.
    pub usage: Vec<ProviderUsage>,
    /// How many providers were asked.
    pub configured: usize,
}

/// Fan the prompt out to all providers and wait for every one to
/// settle. Zero successes is fatal for the caller, not for this
/// function — the telemetry must still reach the store.
pub async fn call_providers(
    clients: &[Arc<dyn ProviderClient>],
    prompt: &str,
    retry: &RetryPolicy,
) -> Result<FanOut> {
    if clients.is_empty() {
        return Err(IndexError::ProviderError(
            "no providers configured".to_string(),
        ));
    }

    let mut set: JoinSet<(Option<ModelScore>, ProviderUsage)> = JoinSet::new();

    for client in clients {
        let client = Arc::clone(client);
        let prompt = prompt.to_string();
        let retry = retry.clone();

        set.spawn(async move {
            let provider_id = client.id().to_string();
            let started = Instant::now();

            let outcome = retry_with_backoff(&retry, &provider_id, || {
                let client = Arc::clone(&client);
                let prompt = prompt.clone();
                async move { client.complete(&prompt).await }
            })
            .await;

            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(reply) => match response::parse_model_score(&provider_id, &reply.text) {
                    Ok(score) => {
                        let usage = usage_row(&provider_id, latency_ms, true, &reply);
                        (Some(score), usage)
                    }
                    Err(e) => {
                        // Discarded entirely, as if the call had failed.
                        warn!(provider = %provider_id, error = %e, "schema-invalid response discarded");
                        let usage = usage_row(&provider_id, latency_ms, false, &reply);
                        (None, usage)
                    }
                },
                Err(_) => {
                    // Synthetic failure row: retries already logged the error.
                    let usage = ProviderUsage {
                        provider_id,
                        latency_ms,
                        success: false,
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        recorded_at: Utc::now(),
                    };
                    (None, usage)
                }
            }
        });
    }

    let mut scores = Vec::new();
    let mut usage = Vec::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((score, row)) => {
                usage.push(row);
                if let Some(score) = score {
                    scores.push(score);
                }
            }
            Err(e) => warn!(error = %e, "provider task failed to join"),
        }
    }

    info!(
        responded = scores.len(),
        configured = clients.len(),
        "provider fan-out settled"
    );

    Ok(FanOut {
        scores,
        usage,
        configured: clients.len(),
    })
}

fn usage_row(
    provider_id: &str,
    latency_ms: u64,
    success: bool,
    reply: &ProviderReply,
) -> ProviderUsage {
    ProviderUsage {
        provider_id: provider_id.to_string(),
        latency_ms,
        success,
        prompt_tokens: reply.prompt_tokens,
        completion_tokens: reply.completion_tokens,
        recorded_at: Utc::now(),
    }
}

/// Build a client for every provider with an API key in the
/// environment; providers without keys are skipped with a warning.
pub fn build_default_providers() -> Vec<Arc<dyn ProviderClient>> {
    let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::new();

    match env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.trim().is_empty() => clients.push(Arc::new(AnthropicClient::new(key))),
        _ => warn!("ANTHROPIC_API_KEY not set, skipping anthropic"),
    }
    match env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => clients.push(Arc::new(OpenAiClient::new(key))),
        _ => warn!("OPENAI_API_KEY not set, skipping openai"),
    }
    match env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => clients.push(Arc::new(GeminiClient::new(key))),
        _ => warn!("GEMINI_API_KEY not set, skipping gemini"),
    }

    clients
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Scripted provider for fan-out and orchestrator tests.
    pub struct ScriptedProvider {
        pub provider_id: &'static str,
        pub reply: Result<String>,
    }

    impl ScriptedProvider {
        pub fn ok(provider_id: &'static str, body: serde_json::Value) -> Arc<dyn ProviderClient> {
            Arc::new(Self {
                provider_id,
                reply: Ok(body.to_string()),
            })
        }

        pub fn failing(provider_id: &'static str) -> Arc<dyn ProviderClient> {
            Arc::new(Self {
                provider_id,
                reply: Err(IndexError::ProviderError("unreachable".to_string())),
            })
        }
    }

    #[async_trait::async_trait]
    impl ProviderClient for ScriptedProvider {
        fn id(&self) -> &str {
            self.provider_id
        }

        async fn complete(&self, _prompt: &str) -> Result<ProviderReply> {
            match &self.reply {
                Ok(text) => Ok(ProviderReply {
                    text: text.clone(),
                    prompt_tokens: 100,
                    completion_tokens: 50,
                }),
                Err(_) => Err(IndexError::ProviderError("unreachable".to_string())),
            }
        }
    }

    pub fn judgment(delta: f64, analysis: &str) -> serde_json::Value {
        serde_json::json!({
            "pillar_scores": {
                "capability": 1.0,
                "labour_market": 0.5,
                "sentiment": 0.0,
                "industry": 0.5,
                "barriers": -0.5
            },
            "technical_delta": delta,
            "economic_delta": delta / 2.0,
            "suggested_delta": delta,
            "analysis": analysis,
            "top_signals": [
                {"text": format!("signal for {}", analysis), "direction": "up", "source": "test", "impact": 2.0}
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{judgment, ScriptedProvider};
    use super::*;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn fan_out_collects_all_successes() {
        let clients = vec![
            ScriptedProvider::ok("anthropic", judgment(1.0, "up a bit")),
            ScriptedProvider::ok("openai", judgment(0.5, "slightly up")),
        ];

        let result = call_providers(&clients, "packet", &fast_retry()).await.unwrap();
        assert_eq!(result.scores.len(), 2);
        assert_eq!(result.usage.len(), 2);
        assert!(result.usage.iter().all(|u| u.success));
    }

    #[tokio::test]
    async fn one_failure_degrades_but_does_not_block() {
        let clients = vec![
            ScriptedProvider::ok("anthropic", judgment(1.0, "up a bit")),
            ScriptedProvider::failing("gemini"),
        ];

        let result = call_providers(&clients, "packet", &fast_retry()).await.unwrap();
        assert_eq!(result.scores.len(), 1);
        assert_eq!(result.usage.len(), 2);

        let failed = result.usage.iter().find(|u| u.provider_id == "gemini").unwrap();
        assert!(!failed.success);
        assert_eq!(failed.prompt_tokens, 0);
    }

    #[tokio::test]
    async fn zero_successes_still_returns_telemetry() {
        let clients = vec![
            ScriptedProvider::failing("anthropic"),
            ScriptedProvider::failing("gemini"),
        ];

        let result = call_providers(&clients, "packet", &fast_retry()).await.unwrap();
        assert!(result.scores.is_empty());
        assert_eq!(result.usage.len(), 2);
    }

    #[tokio::test]
    async fn invalid_schema_counts_as_failure() {
        let clients = vec![ScriptedProvider::ok(
            "openai",
            serde_json::json!({"analysis": "missing the rest"}),
        )];

        let result = call_providers(&clients, "packet", &fast_retry()).await.unwrap();
        assert!(result.scores.is_empty());
        assert!(!result.usage[0].success);
        // Token accounting survives even though the judgment was discarded.
        assert_eq!(result.usage[0].prompt_tokens, 100);
    }

    #[tokio::test]
    async fn empty_provider_list_is_an_error() {
        let clients: Vec<Arc<dyn ProviderClient>> = vec![];
        assert!(call_providers(&clients, "packet", &fast_retry()).await.is_err());
    }
}
