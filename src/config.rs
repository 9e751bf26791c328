//! Engine configuration
//!
//! Tunables for batching, parallelism, retries, and timeouts. All fields
//! have serde defaults so partial configuration files work.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the per-session response pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Guidelines per evaluation batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent evaluation batches in flight
    #[serde(default = "default_proposer_parallelism")]
    pub proposer_parallelism: usize,

    /// Concurrent tool executions within an iteration
    #[serde(default = "default_tool_parallelism")]
    pub tool_parallelism: usize,

    /// Upper bound on glossary terms per turn (K)
    #[serde(default = "default_glossary_limit")]
    pub glossary_limit: usize,

    /// Recent events fed into prompts
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Per-call tool execution timeout
    #[serde(
        default = "default_tool_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub tool_timeout: Duration,

    /// Whole-turn wall clock cap
    #[serde(
        default = "default_turn_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub turn_timeout: Duration,

    /// Maximum long-poll wait accepted from event log readers
    #[serde(
        default = "default_long_poll_cap",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub long_poll_cap: Duration,
}

fn default_batch_size() -> usize {
    5
}

fn default_proposer_parallelism() -> usize {
    4
}

fn default_tool_parallelism() -> usize {
    4
}

fn default_glossary_limit() -> usize {
    20
}

fn default_history_window() -> usize {
    40
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_turn_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_long_poll_cap() -> Duration {
    Duration::from_secs(60)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            proposer_parallelism: default_proposer_parallelism(),
            tool_parallelism: default_tool_parallelism(),
            glossary_limit: default_glossary_limit(),
            history_window: default_history_window(),
            tool_timeout: default_tool_timeout(),
            turn_timeout: default_turn_timeout(),
            long_poll_cap: default_long_poll_cap(),
        }
    }
}

/// Retry and timeout policy for the completion adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles per attempt
    #[serde(
        default = "default_base_backoff",
        serialize_with = "serialize_duration_millis",
        deserialize_with = "deserialize_duration_millis"
    )]
    pub base_backoff: Duration,

    /// Backoff ceiling
    #[serde(
        default = "default_max_backoff",
        serialize_with = "serialize_duration_millis",
        deserialize_with = "deserialize_duration_millis"
    )]
    pub max_backoff: Duration,

    /// Per-attempt timeout
    #[serde(
        default = "default_attempt_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub attempt_timeout: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(8)
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(60)
}

fn serialize_duration_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_duration_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Backoff for the given zero-based attempt index, capped exponential
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        doubled.min(self.max_backoff)
    }
}
