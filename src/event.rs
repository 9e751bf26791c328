//! Session events
//!
//! The session event log is the source of truth for turn inputs: an
//! append-only, offset-ordered, correlation-tagged sequence of message,
//! status, and tool events. Events are never mutated after append except
//! for the tombstone flag, and tombstoned events are invisible to every
//! engine input.

use crate::types::{CorrelationId, EventId, ToolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of an event, used for log filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Message,
    Status,
    Tool,
}

/// Who produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Customer,
    CustomerUi,
    HumanAgent,
    HumanAgentOnBehalfOfAiAgent,
    AiAgent,
    System,
}

/// Lifecycle status carried by status events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Acknowledged,
    Processing,
    Typing,
    Ready,
    Cancelled,
    Error,
    Accepted,
    Pending,
}

/// Why a proactive utterance was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceReason {
    BuyTime,
    FollowUp,
}

/// One tool invocation recorded inside a tool event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_id: ToolId,
    pub arguments: serde_json::Value,
    pub result: ToolCallResult,
}

/// Outcome of a single tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Present when the tool raised; the generator may mention the failure
    /// without leaking internals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool-requested directive for the next iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ToolControl>,
}

/// Control hints a tool may attach to its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolControl {
    /// Re-run guideline matching on the next iteration against this result
    RefreshGuidelines,
}

/// Typed event payload; the serialized form carries the event kind tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventData {
    Message {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        utterance_reason: Option<UtteranceReason>,
    },
    Status {
        status: Status,
        /// Offset of the event this status reacts to; -1 for proactive turns
        trigger_offset: i64,
    },
    Tool {
        calls: Vec<ToolCallRecord>,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Message { .. } => EventKind::Message,
            EventData::Status { .. } => EventKind::Status,
            EventData::Tool { .. } => EventKind::Tool,
        }
    }
}

/// An entry in the session event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Strictly increasing per session, no gaps
    pub offset: u64,
    pub creation_utc: DateTime<Utc>,
    pub source: EventSource,
    pub correlation_id: CorrelationId,
    pub data: EventData,
    /// Tombstone; tombstoned events stay in the store but are invisible to
    /// engine inputs
    #[serde(default)]
    pub deleted: bool,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    /// The message text, when this is a message event
    pub fn message_text(&self) -> Option<&str> {
        match &self.data {
            EventData::Message { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The status, when this is a status event
    pub fn status(&self) -> Option<Status> {
        match &self.data {
            EventData::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this event is a (non-deleted) customer message
    pub fn is_customer_message(&self) -> bool {
        !self.deleted
            && matches!(self.source, EventSource::Customer | EventSource::CustomerUi)
            && matches!(self.data, EventData::Message { .. })
    }
}

/// Payload accepted by `create_event`; the log assigns id, offset, and
/// timestamp at append time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub source: EventSource,
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl NewEvent {
    pub fn customer_message(text: impl Into<String>) -> Self {
        Self {
            source: EventSource::Customer,
            data: EventData::Message {
                text: text.into(),
                utterance_reason: None,
            },
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
