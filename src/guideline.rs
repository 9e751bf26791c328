//! Guidelines and the entailment graph
//!
//! A guideline is a natural-language condition/action pair. Guidelines are
//! plain records; the `entails` relation between them is a separate edge
//! table, and activation closure over it is computed iteratively by the
//! proposer rather than through any dispatch hierarchy.

use crate::types::{ConnectionId, GuidelineId, ToolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A condition/action pair governing agent behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: GuidelineId,
    /// When does this guideline apply, in natural language
    pub condition: String,
    /// What the agent should do when it applies
    pub action: String,
    /// Tools this guideline mandates or benefits from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolId>,
    /// Critical guidelines win priority ties against newer activations and
    /// take precedence over conflicting customer requests
    #[serde(default)]
    pub critical: bool,
    pub creation_utc: DateTime<Utc>,
}

impl Guideline {
    pub fn new(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: GuidelineId::new(),
            condition: condition.into(),
            action: action.into(),
            tools: Vec::new(),
            critical: false,
            creation_utc: Utc::now(),
        }
    }

    pub fn with_tool(mut self, tool_id: ToolId) -> Self {
        self.tools.push(tool_id);
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Whether the guideline has any tool association
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// Kind of a directed guideline connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// When the source is active, re-evaluate the target assuming the
    /// source's condition holds
    Entails,
}

/// A directed edge in the guideline graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineConnection {
    pub id: ConnectionId,
    pub source: GuidelineId,
    pub target: GuidelineId,
    pub kind: ConnectionKind,
}

impl GuidelineConnection {
    pub fn entails(source: GuidelineId, target: GuidelineId) -> Self {
        Self {
            id: ConnectionId::new(),
            source,
            target,
            kind: ConnectionKind::Entails,
        }
    }
}

/// A guideline whose condition was evaluated true for the current turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveGuideline {
    pub guideline: Guideline,
    /// 1–10; higher wins when actions conflict
    pub priority: u8,
    /// Why the condition holds, per the evaluating model
    pub rationale: String,
    /// The condition was applied earlier in the conversation and is being
    /// re-applied to new information
    #[serde(default)]
    pub reapplied: bool,
}

impl ActiveGuideline {
    pub fn new(guideline: Guideline, priority: u8, rationale: impl Into<String>) -> Self {
        Self {
            guideline,
            priority: priority.clamp(1, 10),
            rationale: rationale.into(),
            reapplied: false,
        }
    }

    pub fn id(&self) -> GuidelineId {
        self.guideline.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guideline_builder_accumulates_tools() {
        let g = Guideline::new("customer asks about weather", "check the forecast")
            .with_tool(ToolId::new("weather", "forecast"))
            .with_tool(ToolId::new("weather", "alerts"));
        assert!(g.has_tools());
        assert_eq!(g.tools.len(), 2);
        assert!(!g.critical);
    }

    #[test]
    fn active_guideline_clamps_priority() {
        let g = Guideline::new("c", "a");
        assert_eq!(ActiveGuideline::new(g.clone(), 0, "r").priority, 1);
        assert_eq!(ActiveGuideline::new(g.clone(), 11, "r").priority, 10);
        assert_eq!(ActiveGuideline::new(g, 7, "r").priority, 7);
    }

    #[test]
    fn connection_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionKind::Entails).unwrap();
        assert_eq!(json, "\"entails\"");
    }

    #[test]
    fn guideline_round_trips_through_json() {
        let g = Guideline::new("session starts", "greet with 'Howdy'").critical();
        let json = serde_json::to_string(&g).unwrap();
        let back: Guideline = serde_json::from_str(&json).unwrap();
        assert_eq!(g, back);
    }
}
