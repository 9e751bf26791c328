//! Turn inspection traces
//!
//! For every turn the engine records which guidelines activated, which tools
//! ran, and the rationale texts behind both, keyed by the turn's correlation
//! root. `inspect_event` exposes the trace for debugging.

use crate::event::ToolCallRecord;
use crate::guideline::ActiveGuideline;
use serde::{Deserialize, Serialize};

/// A free-text note recorded by a pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNote {
    /// Which stage wrote the note (`propose`, `tools`, `generate`)
    pub stage: String,
    pub text: String,
}

/// The reasoning record of one turn
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnTrace {
    pub correlation_root: String,
    pub active_guidelines: Vec<ActiveGuideline>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub rationale_texts: Vec<TraceNote>,
}

impl TurnTrace {
    pub fn new(correlation_root: impl Into<String>) -> Self {
        Self {
            correlation_root: correlation_root.into(),
            ..Default::default()
        }
    }

    pub fn note(&mut self, stage: &str, text: impl Into<String>) {
        self.rationale_texts.push(TraceNote {
            stage: stage.to_string(),
            text: text.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_accumulate_in_order() {
        let mut trace = TurnTrace::new("root");
        trace.note("propose", "guideline activated");
        trace.note("generate", "reply grounded in tool data");

        assert_eq!(trace.rationale_texts.len(), 2);
        assert_eq!(trace.rationale_texts[0].stage, "propose");
        assert_eq!(trace.rationale_texts[1].stage, "generate");
    }
}
