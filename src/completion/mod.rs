//! Structured-output completion
//!
//! Vendor-agnostic seam for LLM inference that returns parsed structured
//! output. Adapters implement [`SchematicCompletion`]; the engine goes
//! through [`SchematicGenerator`], which layers retries with capped
//! exponential backoff and jitter, a per-attempt timeout, one
//! invalid-output reprompt, and cancellation over any adapter.

pub mod openai;

use crate::config::RetryPolicy;
use crate::error::{CompletionError, CompletionResult};
use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub use openai::OpenAiCompletion;

/// A single structured-output request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Stage label (`propose`, `tools`, `generate`) for logging and for
    /// deterministic test adapters
    pub stage: String,
    /// System framing: persona, rules, context
    pub system: String,
    /// The task itself
    pub prompt: String,
    /// JSON schema the output must satisfy
    pub schema: serde_json::Value,
    /// Reprompt hint appended after an invalid-output attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl CompletionRequest {
    pub fn new(
        stage: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            stage: stage.into(),
            system: system.into(),
            prompt: prompt.into(),
            schema,
            hint: None,
        }
    }
}

/// Vendor adapter returning raw JSON for a structured-output request
#[async_trait]
pub trait SchematicCompletion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<serde_json::Value>;

    /// Adapter name for logs
    fn name(&self) -> &str;
}

/// Retry/validation layer every stage goes through.
///
/// Transient request failures back off exponentially (with jitter) up to the
/// policy's attempt cap. Output that fails typed validation triggers exactly
/// one reprompt carrying an invalid-output hint; a second failure surfaces
/// as [`CompletionError::InvalidOutput`] and the caller decides whether the
/// stage is skippable.
#[derive(Clone)]
pub struct SchematicGenerator {
    adapter: Arc<dyn SchematicCompletion>,
    policy: RetryPolicy,
}

impl SchematicGenerator {
    pub fn new(adapter: Arc<dyn SchematicCompletion>, policy: RetryPolicy) -> Self {
        Self { adapter, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the request and parse the output into `T`.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        mut request: CompletionRequest,
        token: &CancellationToken,
    ) -> CompletionResult<T> {
        let mut reprompted = false;
        let mut attempt = 0u32;
        let mut last_error = String::new();

        while attempt < self.policy.max_attempts {
            if token.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }

            trace!(
                stage = %request.stage,
                adapter = %self.adapter.name(),
                attempt,
                "issuing completion attempt"
            );

            let outcome = tokio::select! {
                _ = token.cancelled() => return Err(CompletionError::Cancelled),
                result = timeout(self.policy.attempt_timeout, self.adapter.complete(&request)) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(CompletionError::AttemptTimeout(self.policy.attempt_timeout)),
                    }
                }
            };

            match outcome {
                Ok(value) => match serde_json::from_value::<T>(value.clone()) {
                    Ok(parsed) => {
                        debug!(stage = %request.stage, attempt, "completion validated");
                        return Ok(parsed);
                    }
                    Err(parse_err) if !reprompted => {
                        warn!(
                            stage = %request.stage,
                            error = %parse_err,
                            "completion output invalid; reprompting once"
                        );
                        reprompted = true;
                        request.hint = Some(format!(
                            "Your previous output was invalid JSON for the requested schema \
                             ({parse_err}). Respond again with only a JSON object that \
                             satisfies the schema."
                        ));
                        // The reprompt does not consume a retry attempt.
                        continue;
                    }
                    Err(parse_err) => {
                        return Err(CompletionError::InvalidOutput(parse_err.to_string()));
                    }
                },
                Err(CompletionError::Cancelled) => return Err(CompletionError::Cancelled),
                Err(CompletionError::Configuration(message)) => {
                    return Err(CompletionError::Configuration(message));
                }
                Err(transient) => {
                    last_error = transient.to_string();
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        break;
                    }
                    let backoff = with_jitter(self.policy.backoff_for(attempt - 1));
                    warn!(
                        stage = %request.stage,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %last_error,
                        "transient completion failure; backing off"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return Err(CompletionError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        Err(CompletionError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last: last_error,
        })
    }
}

/// Add up to 25% random jitter so retry storms decorrelate
fn with_jitter(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    base.mul_f64(1.0 + jitter)
}
