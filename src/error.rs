//! Error types for the engine
//!
//! This module provides the error taxonomy for all engine operations using
//! thiserror. Per-stage failures (a glossary lookup, an individual
//! evaluation batch, a single tool) are recovered locally by the stages
//! themselves; only whole-turn failures surface as [`EngineError`].

use crate::types::{AgentId, SessionId, ToolId};
use std::time::Duration;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The turn was cancelled cooperatively. Not a failure: no message event
    /// is produced and a `cancelled` status event is appended.
    #[error("turn cancelled for session {0}")]
    Cancelled(SessionId),

    /// The whole-turn wall clock cap was exceeded
    #[error("turn exceeded wall clock cap of {cap:?} for session {session_id}")]
    TurnTimeout {
        session_id: SessionId,
        cap: Duration,
    },

    /// Agent not found
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Repository error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Completion adapter error that could not be recovered by a stage
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    /// Tool protocol error that could not be recovered by the tool caller
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error (should not happen in normal operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error terminates the turn without an `error` status.
    /// Cancellation is reported as a warning, never as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}

/// Errors raised by the structured-output completion adapter
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CompletionError {
    /// Transport or vendor API failure; transient, retried with backoff
    #[error("completion request failed: {0}")]
    Request(String),

    /// A single attempt exceeded its timeout
    #[error("completion attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// The model produced output that is not valid JSON for the schema.
    /// Retried once with an invalid-output hint before the stage is skipped.
    #[error("completion output did not match the requested schema: {0}")]
    InvalidOutput(String),

    /// All retry attempts were exhausted
    #[error("completion retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Adapter misconfiguration (missing key, bad model name)
    #[error("completion configuration error: {0}")]
    Configuration(String),

    /// The turn's cancellation token fired while the request was in flight
    #[error("completion cancelled")]
    Cancelled,
}

/// Errors raised by the tool protocol
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ToolError {
    /// No service registered under this name
    #[error("unknown tool service: {0}")]
    UnknownService(String),

    /// The service has no tool with this name
    #[error("tool not found: {0}")]
    NotFound(ToolId),

    /// Arguments failed schema validation
    #[error("invalid arguments for {tool_id}: {reason}")]
    InvalidArguments { tool_id: ToolId, reason: String },

    /// The tool itself raised. Recorded in the call result's `error` field;
    /// never retried by the engine.
    #[error("tool {tool_id} failed: {message}")]
    Execution { tool_id: ToolId, message: String },
}

/// Repository errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Serialization failed inside a store
    #[error("store serialization failed: {0}")]
    Serialization(String),

    /// Internal store error
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, EngineError>;

/// Type alias for completion adapter results
pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

/// Type alias for store results
pub type StoreResult<T> = std::result::Result<T, StoreError>;
