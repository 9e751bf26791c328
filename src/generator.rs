//! Message Generator
//!
//! Composes the turn's final message(s), constrained by the active
//! guidelines and their priorities, the glossary, the turn's tool results,
//! and the conversation itself. Depending on the composition mode the reply
//! is free text, fragment-preferring free text, or strictly assembled from
//! instantiated fragments.

use crate::agent::{Agent, CompositionMode};
use crate::completion::{CompletionRequest, SchematicGenerator};
use crate::error::CompletionError;
use crate::event::{Event, ToolCallRecord, UtteranceReason};
use crate::fragment::Fragment;
use crate::glossary::Term;
use crate::guideline::ActiveGuideline;
use crate::prompt;
use crate::toolcaller::PendingInfo;
use crate::variables::ContextVariable;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// A proactive utterance request: produce one message aligned with the
/// action without waiting for a customer prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtteranceRequest {
    pub action: String,
    pub reason: UtteranceReason,
}

/// Everything the generator reads
pub struct GeneratorInput<'a> {
    pub agent: &'a Agent,
    pub history: &'a [Event],
    pub active: &'a [ActiveGuideline],
    pub terms: &'a [Term],
    pub variables: &'a [ContextVariable],
    /// All tool results gathered during this turn
    pub tool_results: &'a [ToolCallRecord],
    /// Shortfalls the reply must disclose instead of papering over
    pub pending: &'a [PendingInfo],
    pub fragments: &'a [Fragment],
    pub utterance: Option<&'a UtteranceRequest>,
}

/// Generated messages plus rationale notes for the turn trace
#[derive(Debug, Default)]
pub struct GeneratedMessages {
    pub messages: Vec<String>,
    pub notes: Vec<String>,
}

impl GeneratedMessages {
    fn silent(note: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            notes: vec![note.into()],
        }
    }
}

/// Free-text reply draft (fluid and fluid-assembly modes)
#[derive(Debug, Deserialize)]
struct DraftReply {
    should_reply: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    abstain_reason: Option<String>,
    /// Active guidelines the draft could not satisfy, with the reason why
    #[serde(default)]
    unmet_guidelines: Vec<UnmetGuideline>,
}

#[derive(Debug, Deserialize)]
struct UnmetGuideline {
    condition: String,
    explanation: String,
}

fn draft_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "should_reply": {"type": "boolean"},
            "message": {"type": "string"},
            "abstain_reason": {"type": "string"},
            "unmet_guidelines": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "condition": {"type": "string"},
                        "explanation": {"type": "string"}
                    },
                    "required": ["condition", "explanation"]
                }
            }
        },
        "required": ["should_reply"]
    })
}

/// Strict-assembly reply: fragment selections with slot values
#[derive(Debug, Deserialize)]
struct AssemblyReply {
    #[serde(default)]
    segments: Vec<FragmentChoice>,
    #[serde(default)]
    abstain_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FragmentChoice {
    /// 1-based index into the offered fragment list
    fragment_number: usize,
    #[serde(default)]
    slots: BTreeMap<String, String>,
}

fn assembly_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "segments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "fragment_number": {"type": "integer", "minimum": 1},
                        "slots": {"type": "object"}
                    },
                    "required": ["fragment_number"]
                }
            },
            "abstain_reason": {"type": "string"}
        },
        "required": ["segments"]
    })
}

/// Composes the final message(s) of a turn
pub struct MessageGenerator {
    generator: SchematicGenerator,
}

impl MessageGenerator {
    pub fn new(generator: SchematicGenerator) -> Self {
        Self { generator }
    }

    /// Produce zero or more messages for the turn.
    pub async fn generate(
        &self,
        input: &GeneratorInput<'_>,
        token: &CancellationToken,
    ) -> Result<GeneratedMessages, CompletionError> {
        if input.utterance.is_none() {
            if let Some(request) = stop_request(input.history) {
                info!("customer asked the agent to stop responding");
                return Ok(GeneratedMessages::silent(format!(
                    "no reply: customer requested silence (\"{request}\")"
                )));
            }

            // No unprompted chatter: stay silent when there is nothing to
            // react to and no proactive guideline fired.
            if !reply_expected(input.history) && input.active.is_empty() {
                trace!("nothing to react to and no proactive guideline");
                return Ok(GeneratedMessages::silent(
                    "no reply: no customer message awaiting a response and no active guideline",
                ));
            }
        }

        match input.agent.composition_mode {
            CompositionMode::StrictAssembly => self.generate_assembled(input, token).await,
            CompositionMode::Fluid | CompositionMode::FluidAssembly => {
                self.generate_fluid(input, token).await
            }
        }
    }

    async fn generate_fluid(
        &self,
        input: &GeneratorInput<'_>,
        token: &CancellationToken,
    ) -> Result<GeneratedMessages, CompletionError> {
        let request = CompletionRequest::new(
            "generate",
            self.system_framing(input),
            self.fluid_prompt(input),
            draft_schema(),
        );
        let draft: DraftReply = self.generator.generate(request, token).await?;

        let mut notes = Vec::new();
        for unmet in &draft.unmet_guidelines {
            notes.push(format!(
                "guideline not satisfied (when {}): {}",
                unmet.condition, unmet.explanation
            ));
        }

        match (draft.should_reply, draft.message) {
            (true, Some(message)) if !message.trim().is_empty() => {
                debug!(length = message.len(), "fluid reply drafted");
                Ok(GeneratedMessages {
                    messages: vec![message],
                    notes,
                })
            }
            _ => {
                let reason = draft
                    .abstain_reason
                    .unwrap_or_else(|| "model chose not to reply".to_string());
                notes.push(format!("no reply: {reason}"));
                Ok(GeneratedMessages {
                    messages: Vec::new(),
                    notes,
                })
            }
        }
    }

    /// Strict assembly: every emitted segment must be an offered fragment
    /// with all slots filled, or nothing is emitted at all.
    async fn generate_assembled(
        &self,
        input: &GeneratorInput<'_>,
        token: &CancellationToken,
    ) -> Result<GeneratedMessages, CompletionError> {
        if input.fragments.is_empty() {
            return Ok(GeneratedMessages::silent(
                "no reply: strict assembly with no fragments available",
            ));
        }

        let request = CompletionRequest::new(
            "generate",
            self.system_framing(input),
            self.assembly_prompt(input),
            assembly_schema(),
        );
        let reply: AssemblyReply = self.generator.generate(request, token).await?;

        if reply.segments.is_empty() {
            let reason = reply
                .abstain_reason
                .unwrap_or_else(|| "no fragment combination expresses the required content".into());
            return Ok(GeneratedMessages::silent(format!("no reply: {reason}")));
        }

        let mut rendered = Vec::new();
        for choice in &reply.segments {
            let Some(fragment) = choice
                .fragment_number
                .checked_sub(1)
                .and_then(|i| input.fragments.get(i))
            else {
                return Ok(GeneratedMessages::silent(format!(
                    "no reply: assembly referenced unknown fragment {}",
                    choice.fragment_number
                )));
            };
            match fragment.instantiate(&choice.slots) {
                Ok(text) => rendered.push(text),
                Err(missing) => {
                    return Ok(GeneratedMessages::silent(format!(
                        "no reply: fragment {} missing slots {:?}",
                        choice.fragment_number, missing
                    )));
                }
            }
        }

        debug!(segment_count = rendered.len(), "assembled reply validated");
        Ok(GeneratedMessages {
            messages: vec![rendered.join(" ")],
            notes: Vec::new(),
        })
    }

    fn system_framing(&self, input: &GeneratorInput<'_>) -> String {
        format!(
            "You write the next message for a customer-facing AI agent.\n\
             Agent description: {}\n\n\
             Domain glossary:\n{}\n\
             Context variables:\n{}\n\
             Active guidelines (obey all; on conflict the higher priority wins; on equal \
             priority the most recently activated wins unless the older one is critical; \
             never silently drop a guideline — if one cannot be satisfied, list it under \
             unmet_guidelines with an explanation):\n{}\n\
             Tool results from this turn:\n{}\n\
             Grounding: state only facts present in the tool results, context variables, \
             glossary, or conversation. When information is unknown or a tool failed, say \
             so plainly without exposing internal details, and do not fabricate an answer.",
            input.agent.description,
            prompt::render_terms(input.terms),
            prompt::render_variables(input.variables),
            prompt::render_active_guidelines(input.active),
            prompt::render_tool_results(input.tool_results),
        )
    }

    fn fluid_prompt(&self, input: &GeneratorInput<'_>) -> String {
        let mut text = format!(
            "Conversation so far:\n{}\n",
            prompt::render_conversation(input.history)
        );

        if !input.pending.is_empty() {
            text.push_str("\nInformation still missing before tools could run:\n");
            for pending in input.pending {
                text.push_str(&format!(
                    "- {} needs {}\n",
                    pending.tool_id,
                    pending.missing.join(", ")
                ));
            }
            text.push_str("Ask for the missing information instead of guessing.\n");
        }

        if input.agent.composition_mode == CompositionMode::FluidAssembly
            && !input.fragments.is_empty()
        {
            text.push_str("\nPrefer these fragments where they fit, substituting slot values; \
                           free text is allowed when none fits:\n");
            for fragment in input.fragments {
                text.push_str(&format!("- {}\n", fragment.template));
            }
        }

        match input.utterance {
            Some(request) => {
                let intent = match request.reason {
                    UtteranceReason::BuyTime => {
                        "Let the customer know the agent is still working on it"
                    }
                    UtteranceReason::FollowUp => "Follow up proactively",
                };
                text.push_str(&format!(
                    "\n{intent}. Write one message that carries out this action: {}\n",
                    request.action
                ));
            }
            None => {
                text.push_str(
                    "\nWrite the agent's next reply, or abstain (should_reply=false) when no \
                     reply is appropriate.\n",
                );
            }
        }
        text
    }

    fn assembly_prompt(&self, input: &GeneratorInput<'_>) -> String {
        let mut text = format!(
            "Conversation so far:\n{}\n\nAvailable fragments:\n",
            prompt::render_conversation(input.history)
        );
        for (index, fragment) in input.fragments.iter().enumerate() {
            text.push_str(&format!("Fragment {}: {}\n", index + 1, fragment.template));
        }
        text.push_str(
            "\nCompose the reply exclusively from these fragments, filling every slot with \
             values from the conversation, context variables, or tool results. If no \
             combination of fragments expresses what the reply requires, return an empty \
             segments list with an abstain_reason.\n",
        );
        text
    }
}

/// The customer's explicit request for silence, if present in their latest
/// message
fn stop_request(history: &[Event]) -> Option<String> {
    const STOP_PHRASES: &[&str] = &[
        "stop responding",
        "stop replying",
        "stop messaging",
        "stop talking",
        "don't respond",
        "do not respond",
        "don't reply",
        "do not reply",
    ];

    let last_customer = history
        .iter()
        .rev()
        .find(|event| event.is_customer_message())?;
    let text = last_customer.message_text()?.to_lowercase();
    STOP_PHRASES
        .iter()
        .find(|phrase| text.contains(*phrase))
        .map(|phrase| phrase.to_string())
}

/// Whether the last visible message in the session is a customer message
/// still awaiting a reply
fn reply_expected(history: &[Event]) -> bool {
    history
        .iter()
        .rev()
        .find_map(|event| match event.message_text() {
            Some(_) if !event.deleted => Some(event.is_customer_message()),
            _ => None,
        })
        .unwrap_or(false)
}
