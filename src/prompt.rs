//! Prompt section rendering
//!
//! Shared helpers that render conversation history, glossary terms, context
//! variables, active guidelines, and tool results into the text sections the
//! inference stages compose their prompts from. Rendering is deterministic
//! so cached test adapters stay stable.

use crate::event::{Event, EventData, EventSource, ToolCallRecord};
use crate::glossary::Term;
use crate::guideline::ActiveGuideline;
use crate::variables::ContextVariable;
use std::fmt::Write;

/// Render the bounded conversation window as speaker-labelled lines
pub(crate) fn render_conversation(events: &[Event]) -> String {
    let mut out = String::new();
    for event in events {
        match &event.data {
            EventData::Message { text, .. } => {
                let speaker = match event.source {
                    EventSource::Customer | EventSource::CustomerUi => "Customer",
                    EventSource::HumanAgent | EventSource::HumanAgentOnBehalfOfAiAgent => {
                        "Human agent"
                    }
                    EventSource::AiAgent => "Agent",
                    EventSource::System => "System",
                };
                let _ = writeln!(out, "{speaker}: {text}");
            }
            EventData::Tool { calls } => {
                for call in calls {
                    let _ = writeln!(
                        out,
                        "[tool {} -> {}]",
                        call.tool_id,
                        summarize_result(call)
                    );
                }
            }
            EventData::Status { .. } => {}
        }
    }
    if out.is_empty() {
        out.push_str("(no conversation yet)\n");
    }
    out
}

fn summarize_result(call: &ToolCallRecord) -> String {
    match &call.result.error {
        Some(error) => format!("error: {error}"),
        None => call.result.data.to_string(),
    }
}

/// Render glossary terms with synonyms and definitions
pub(crate) fn render_terms(terms: &[Term]) -> String {
    if terms.is_empty() {
        return "(none)\n".to_string();
    }
    let mut out = String::new();
    for term in terms {
        if term.synonyms.is_empty() {
            let _ = writeln!(out, "- {}: {}", term.name, term.definition);
        } else {
            let _ = writeln!(
                out,
                "- {} (also: {}): {}",
                term.name,
                term.synonyms.join(", "),
                term.definition
            );
        }
    }
    out
}

/// Render non-stale context variables as name/value lines
pub(crate) fn render_variables(variables: &[ContextVariable]) -> String {
    if variables.is_empty() {
        return "(none)\n".to_string();
    }
    let mut out = String::new();
    for variable in variables {
        let _ = writeln!(out, "- {} = {}", variable.name, variable.value);
    }
    out
}

/// Render active guidelines ordered by priority, highest first
pub(crate) fn render_active_guidelines(active: &[ActiveGuideline]) -> String {
    if active.is_empty() {
        return "(none)\n".to_string();
    }
    let mut ordered: Vec<&ActiveGuideline> = active.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    let mut out = String::new();
    for entry in ordered {
        let _ = writeln!(
            out,
            "- [priority {}{}] when {}, then {}",
            entry.priority,
            if entry.guideline.critical {
                ", critical"
            } else {
                ""
            },
            entry.guideline.condition,
            entry.guideline.action
        );
    }
    out
}

/// Render tool results gathered during this turn
pub(crate) fn render_tool_results(records: &[ToolCallRecord]) -> String {
    if records.is_empty() {
        return "(none)\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "- {}({}) -> {}",
            record.tool_id,
            record.arguments,
            summarize_result(record)
        );
    }
    out
}
