//! Tool Caller
//!
//! Given the active guidelines that carry tool associations, decides which
//! tools to call with which arguments, validates those arguments against
//! the tool schemas and against the conversation itself, executes accepted
//! calls concurrently, and reports the iteration's calls plus any shortfall
//! the message generator must disclose.

use crate::agent::Agent;
use crate::completion::{CompletionRequest, SchematicGenerator};
use crate::error::CompletionError;
use crate::event::{Event, ToolCallRecord, ToolCallResult};
use crate::glossary::Term;
use crate::guideline::ActiveGuideline;
use crate::prompt;
use crate::tool::{conform_arguments, ParameterType, ToolDescriptor, ToolRegistry};
use crate::types::ToolId;
use crate::variables::ContextVariable;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Everything the tool caller reads for one iteration
pub struct ToolCallerInput<'a> {
    pub agent: &'a Agent,
    pub active: &'a [ActiveGuideline],
    pub terms: &'a [Term],
    pub variables: &'a [ContextVariable],
    pub history: &'a [Event],
    /// Results from earlier iterations of this turn
    pub prior_results: &'a [ToolCallRecord],
    /// Turn-local clock used to resolve relative-date derivations
    pub now: DateTime<Utc>,
}

/// A required argument the model could not ground in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInfo {
    pub tool_id: ToolId,
    pub missing: Vec<String>,
    pub reason: String,
}

/// Outcome of one tool stage
#[derive(Debug, Default)]
pub struct ToolStageReport {
    /// Executed calls, including ones whose tool raised
    pub calls: Vec<ToolCallRecord>,
    /// Calls skipped because a required argument could not be grounded
    pub pending: Vec<PendingInfo>,
}

/// Model output for one tool's call inference
#[derive(Debug, Deserialize)]
struct ToolInference {
    calls: Vec<ToolCallCandidate>,
}

#[derive(Debug, Deserialize)]
struct ToolCallCandidate {
    should_call: bool,
    #[serde(default)]
    arguments: serde_json::Map<String, Value>,
    #[serde(default)]
    rationale: String,
}

fn inference_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "calls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "should_call": {"type": "boolean"},
                        "arguments": {"type": "object"},
                        "rationale": {"type": "string"}
                    },
                    "required": ["should_call"]
                }
            }
        },
        "required": ["calls"]
    })
}

/// Decides and executes tool calls for one iteration
pub struct ToolCaller {
    generator: SchematicGenerator,
    registry: Arc<ToolRegistry>,
    parallelism: usize,
    tool_timeout: Duration,
}

impl ToolCaller {
    pub fn new(
        generator: SchematicGenerator,
        registry: Arc<ToolRegistry>,
        parallelism: usize,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            registry,
            parallelism: parallelism.max(1),
            tool_timeout,
        }
    }

    /// Run the tool stage.
    ///
    /// Only tools referenced by at least one active guideline are candidates.
    /// Per-tool inference failures skip that tool with a warning; only
    /// cancellation aborts the stage. Already-started executions run to
    /// completion even under cancellation; the caller discards the results.
    pub async fn run(
        &self,
        input: &ToolCallerInput<'_>,
        token: &CancellationToken,
    ) -> Result<ToolStageReport, CompletionError> {
        let candidates = collect_candidates(input.active);
        if candidates.is_empty() {
            return Ok(ToolStageReport::default());
        }
        debug!(candidate_count = candidates.len(), "inferring tool calls");

        let mut accepted: Vec<(ToolDescriptor, BTreeMap<String, Value>)> = Vec::new();
        let mut pending = Vec::new();

        for (tool_id, requirers) in candidates {
            if token.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }

            let descriptor = match self.registry.descriptor(&tool_id).await {
                Ok(descriptor) => descriptor,
                Err(error) => {
                    warn!(tool_id = %tool_id, error = %error, "tool unavailable; skipping");
                    continue;
                }
            };

            let inference = match self
                .infer_calls(input, &descriptor, &requirers, token)
                .await
            {
                Ok(inference) => inference,
                Err(CompletionError::Cancelled) => return Err(CompletionError::Cancelled),
                Err(error) => {
                    warn!(tool_id = %tool_id, error = %error, "tool inference skipped");
                    continue;
                }
            };

            for candidate in inference.calls {
                if !candidate.should_call {
                    continue;
                }

                let conformed = match conform_arguments(&descriptor, &candidate.arguments) {
                    Ok(conformed) => conformed,
                    Err(error) => {
                        // A schema-invalid candidate is a shortfall, not a
                        // call with invented values.
                        debug!(tool_id = %tool_id, error = %error, "candidate rejected");
                        pending.push(PendingInfo {
                            tool_id: tool_id.clone(),
                            missing: vec![],
                            reason: error.to_string(),
                        });
                        continue;
                    }
                };

                let ungrounded = ungrounded_arguments(input, &descriptor, &conformed);
                if !ungrounded.is_empty() {
                    debug!(
                        tool_id = %tool_id,
                        arguments = ?ungrounded,
                        "candidate skipped: required arguments lack provenance"
                    );
                    pending.push(PendingInfo {
                        tool_id: tool_id.clone(),
                        missing: ungrounded,
                        reason: candidate.rationale.clone(),
                    });
                    continue;
                }

                let duplicate_now = accepted
                    .iter()
                    .any(|(d, args)| d.id == descriptor.id && args == &conformed);
                let duplicate_before = input.prior_results.iter().any(|record| {
                    record.tool_id == descriptor.id
                        && record.arguments == arguments_value(&conformed)
                });
                if duplicate_now || duplicate_before {
                    trace!(tool_id = %tool_id, "dropping duplicate call");
                    continue;
                }

                accepted.push((descriptor.clone(), conformed));
            }
        }

        if accepted.is_empty() {
            return Ok(ToolStageReport {
                calls: Vec::new(),
                pending,
            });
        }

        info!(call_count = accepted.len(), "executing tool calls");
        let calls = stream::iter(accepted.into_iter().map(|(descriptor, arguments)| {
            let registry = Arc::clone(&self.registry);
            let time_limit = self.tool_timeout;
            async move {
                let result = registry
                    .execute(&descriptor.id, arguments.clone(), time_limit)
                    .await;
                let result = match result {
                    Ok(outcome) => ToolCallResult {
                        data: outcome.data,
                        metadata: outcome.metadata,
                        error: None,
                        control: outcome.control,
                    },
                    Err(error) => {
                        warn!(tool_id = %descriptor.id, error = %error, "tool raised");
                        ToolCallResult {
                            data: Value::Null,
                            metadata: HashMap::new(),
                            error: Some(error.to_string()),
                            control: None,
                        }
                    }
                };
                ToolCallRecord {
                    tool_id: descriptor.id,
                    arguments: arguments_value(&arguments),
                    result,
                }
            }
        }))
        .buffered(self.parallelism)
        .collect::<Vec<_>>()
        .await;

        Ok(ToolStageReport { calls, pending })
    }

    async fn infer_calls(
        &self,
        input: &ToolCallerInput<'_>,
        descriptor: &ToolDescriptor,
        requirers: &[&ActiveGuideline],
        token: &CancellationToken,
    ) -> Result<ToolInference, CompletionError> {
        let system = format!(
            "You decide whether an AI agent should call a tool right now, and with which \
             arguments.\nAgent description: {}\n\n\
             Domain glossary:\n{}\n\
             Context variables:\n{}\n\
             Recent conversation:\n{}\n\
             Earlier tool results this turn:\n{}",
            input.agent.description,
            prompt::render_terms(input.terms),
            prompt::render_variables(input.variables),
            prompt::render_conversation(input.history),
            prompt::render_tool_results(input.prior_results),
        );

        let mut prompt = format!(
            "Tool: {}\nDescription: {}\nParameters:\n",
            descriptor.id, descriptor.description
        );
        for (name, schema) in &descriptor.parameters {
            prompt.push_str(&format!(
                "- {} ({:?}{}) — {}{}\n",
                name,
                schema.param_type,
                if schema.required { ", required" } else { "" },
                schema.description,
                schema
                    .enum_values
                    .as_ref()
                    .map(|values| format!(" (one of: {})", values.join(", ")))
                    .unwrap_or_default(),
            ));
        }
        prompt.push_str("\nGuidelines mandating or benefiting from this tool:\n");
        for active in requirers {
            prompt.push_str(&format!(
                "- when {}, then {}\n",
                active.guideline.condition, active.guideline.action
            ));
        }
        prompt.push_str(
            "\nReturn every invocation that is warranted (the same tool may be called several \
             times with different arguments). Use only argument values stated in the \
             conversation, context variables, or earlier tool results; never guess. When \
             nothing warrants a call, return a single entry with should_call=false.",
        );

        let request = CompletionRequest::new("tools", system, prompt, inference_schema());
        self.generator.generate(request, token).await
    }
}

/// `tool → active guidelines requiring it`, in activation order
fn collect_candidates<'a>(
    active: &'a [ActiveGuideline],
) -> Vec<(ToolId, Vec<&'a ActiveGuideline>)> {
    let mut order: Vec<ToolId> = Vec::new();
    let mut requirers: HashMap<ToolId, Vec<&ActiveGuideline>> = HashMap::new();
    for entry in active {
        for tool_id in &entry.guideline.tools {
            if !requirers.contains_key(tool_id) {
                order.push(tool_id.clone());
            }
            requirers.entry(tool_id.clone()).or_default().push(entry);
        }
    }
    order
        .into_iter()
        .map(|id| {
            let requirers = requirers.remove(&id).unwrap_or_default();
            (id, requirers)
        })
        .collect()
}

fn arguments_value(arguments: &BTreeMap<String, Value>) -> Value {
    Value::Object(arguments.clone().into_iter().collect())
}

/// The over-optimism guard: names of required arguments whose value cannot
/// be traced to the conversation, a context variable, a prior tool result,
/// or a deterministic derivation thereof (a relative-day expression such as
/// "tomorrow" resolved against the turn's clock). Enum and boolean
/// parameters are choices over the schema, not free values, and are exempt.
fn ungrounded_arguments(
    input: &ToolCallerInput<'_>,
    descriptor: &ToolDescriptor,
    arguments: &BTreeMap<String, Value>,
) -> Vec<String> {
    let corpus = provenance_corpus(input);
    let mut ungrounded = Vec::new();

    for (name, schema) in &descriptor.parameters {
        if !schema.required || schema.enum_values.is_some() {
            continue;
        }
        let Some(value) = arguments.get(name) else {
            continue;
        };
        let string_grounded = |text: &str| {
            corpus_contains_text(&corpus, text) || derived_date_grounded(&corpus, text, input.now)
        };
        let grounded = match (schema.param_type, value) {
            (ParameterType::Boolean, _) => true,
            (_, Value::String(text)) => string_grounded(text),
            (_, Value::Number(number)) => corpus_contains_number(&corpus, number),
            // Composite values are model-assembled; require each leaf to be
            // grounded.
            (_, Value::Array(items)) => items.iter().all(|item| match item {
                Value::String(text) => string_grounded(text),
                Value::Number(number) => corpus_contains_number(&corpus, number),
                _ => true,
            }),
            _ => true,
        };
        if !grounded {
            ungrounded.push(name.clone());
        }
    }

    ungrounded
}

/// Deterministic date derivation: a date-shaped value is grounded when the
/// corpus contains a relative-day expression that resolves to exactly that
/// date against `now`.
fn derived_date_grounded(corpus: &str, text: &str, now: DateTime<Utc>) -> bool {
    const RELATIVE_DAYS: &[(&str, i64)] = &[
        ("day after tomorrow", 2),
        ("tomorrow", 1),
        ("today", 0),
        ("tonight", 0),
        ("yesterday", -1),
    ];

    let Some(date) = parse_date_value(text) else {
        return false;
    };
    RELATIVE_DAYS.iter().any(|(phrase, offset)| {
        corpus.contains(phrase) && now.date_naive() + chrono::Duration::days(*offset) == date
    })
}

fn parse_date_value(text: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Everything an argument value may legitimately come from, lowercased
fn provenance_corpus(input: &ToolCallerInput<'_>) -> String {
    let mut corpus = prompt::render_conversation(input.history).to_lowercase();
    for variable in input.variables {
        corpus.push_str(&variable.name.to_lowercase());
        corpus.push(' ');
        corpus.push_str(&variable.value.to_string().to_lowercase());
        corpus.push('\n');
    }
    for record in input.prior_results {
        corpus.push_str(&record.result.data.to_string().to_lowercase());
        corpus.push('\n');
        corpus.push_str(&record.arguments.to_string().to_lowercase());
        corpus.push('\n');
    }
    corpus
}

fn corpus_contains_text(corpus: &str, text: &str) -> bool {
    !text.is_empty() && corpus.contains(&text.to_lowercase())
}

fn corpus_contains_number(corpus: &str, number: &serde_json::Number) -> bool {
    let rendered = number.to_string();
    if contains_number_token(corpus, &rendered) {
        return true;
    }
    // Tolerate int/float rendering differences: 8 vs 8.0
    if let Some(float) = number.as_f64() {
        if float.fract() == 0.0 {
            let as_int = format!("{}", float as i64);
            let as_float = format!("{:.1}", float);
            return contains_number_token(corpus, &as_int)
                || contains_number_token(corpus, &as_float);
        }
    }
    false
}

/// Number match on digit boundaries, so `42` does not ground in `142`
fn contains_number_token(corpus: &str, token: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = corpus[start..].find(token) {
        let begin = start + pos;
        let end = begin + token.len();
        let before_ok = begin == 0
            || !corpus[..begin]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_digit() || c == '.');
        let after_ok = end == corpus.len()
            || !corpus[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit() || c == '.');
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventData, EventSource};
    use crate::guideline::Guideline;
    use crate::tool::ParameterSchema;
    use crate::types::{CorrelationId, EventId};
    use chrono::Utc;

    fn customer_event(text: &str) -> Event {
        Event {
            id: EventId::new(),
            offset: 0,
            creation_utc: Utc::now(),
            source: EventSource::Customer,
            correlation_id: CorrelationId::fresh_root(),
            data: EventData::Message {
                text: text.into(),
                utterance_reason: None,
            },
            deleted: false,
        }
    }

    fn add_descriptor() -> ToolDescriptor {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "first_number".to_string(),
            ParameterSchema::required(ParameterType::Integer, "left operand"),
        );
        parameters.insert(
            "second_number".to_string(),
            ParameterSchema::required(ParameterType::Integer, "right operand"),
        );
        ToolDescriptor {
            id: ToolId::new("math", "add"),
            description: "adds two numbers".into(),
            parameters,
        }
    }

    fn agent() -> Agent {
        Agent::new("Calc", "an arithmetic assistant")
    }

    #[test]
    fn candidates_follow_activation_order_and_group_requirers() {
        let tool_a = ToolId::new("math", "add");
        let tool_b = ToolId::new("math", "multiply");
        let g1 = ActiveGuideline::new(
            Guideline::new("c1", "a1")
                .with_tool(tool_a.clone())
                .with_tool(tool_b.clone()),
            5,
            "r",
        );
        let g2 = ActiveGuideline::new(Guideline::new("c2", "a2").with_tool(tool_a.clone()), 7, "r");

        let candidates = collect_candidates(&[g1, g2]);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0, tool_a);
        assert_eq!(candidates[0].1.len(), 2);
        assert_eq!(candidates[1].0, tool_b);
        assert_eq!(candidates[1].1.len(), 1);
    }

    #[test]
    fn grounded_numbers_pass_the_guard() {
        let agent = agent();
        let history = vec![customer_event("What is 8+2?")];
        let input = ToolCallerInput {
            agent: &agent,
            active: &[],
            terms: &[],
            variables: &[],
            history: &history,
            prior_results: &[],
            now: Utc::now(),
        };
        let mut arguments = BTreeMap::new();
        arguments.insert("first_number".to_string(), json!(8));
        arguments.insert("second_number".to_string(), json!(2));

        assert!(ungrounded_arguments(&input, &add_descriptor(), &arguments).is_empty());
    }

    #[test]
    fn invented_numbers_fail_the_guard() {
        let agent = agent();
        let history = vec![customer_event("What is 8 plus something?")];
        let input = ToolCallerInput {
            agent: &agent,
            active: &[],
            terms: &[],
            variables: &[],
            history: &history,
            prior_results: &[],
            now: Utc::now(),
        };
        let mut arguments = BTreeMap::new();
        arguments.insert("first_number".to_string(), json!(8));
        arguments.insert("second_number".to_string(), json!(42));

        let ungrounded = ungrounded_arguments(&input, &add_descriptor(), &arguments);
        assert_eq!(ungrounded, vec!["second_number"]);
    }

    #[test]
    fn number_tokens_do_not_match_inside_larger_numbers() {
        assert!(!contains_number_token("the total is 142 dollars", "42"));
        assert!(contains_number_token("pay 42 dollars", "42"));
        assert!(!contains_number_token("version 4.25", "4.2"));
    }

    #[test]
    fn variables_and_prior_results_ground_arguments() {
        let agent = agent();
        let history = vec![customer_event("check my balance")];
        let variables = vec![ContextVariable::global("account_number", json!("AC-900"))];
        let prior = vec![ToolCallRecord {
            tool_id: ToolId::new("ledger", "lookup"),
            arguments: json!({}),
            result: ToolCallResult {
                data: json!({"routing": 771}),
                metadata: HashMap::new(),
                error: None,
                control: None,
            },
        }];
        let input = ToolCallerInput {
            agent: &agent,
            active: &[],
            terms: &[],
            variables: &variables,
            history: &history,
            prior_results: &prior,
            now: Utc::now(),
        };

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "account".to_string(),
            ParameterSchema::required(ParameterType::String, "account number"),
        );
        parameters.insert(
            "routing".to_string(),
            ParameterSchema::required(ParameterType::Integer, "routing code"),
        );
        let descriptor = ToolDescriptor {
            id: ToolId::new("ledger", "transfer"),
            description: "transfer".into(),
            parameters,
        };

        let mut arguments = BTreeMap::new();
        arguments.insert("account".to_string(), json!("AC-900"));
        arguments.insert("routing".to_string(), json!(771));

        assert!(ungrounded_arguments(&input, &descriptor, &arguments).is_empty());
    }

    #[test]
    fn relative_date_expressions_ground_derived_dates() {
        let agent = agent();
        let history = vec![customer_event("Book the appointment for tomorrow please")];
        let now = Utc::now();
        let input = ToolCallerInput {
            agent: &agent,
            active: &[],
            terms: &[],
            variables: &[],
            history: &history,
            prior_results: &[],
            now,
        };

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "date".to_string(),
            ParameterSchema::required(ParameterType::String, "appointment date"),
        );
        let descriptor = ToolDescriptor {
            id: ToolId::new("calendar", "book"),
            description: "books an appointment".into(),
            parameters,
        };

        let tomorrow = (now.date_naive() + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let mut arguments = BTreeMap::new();
        arguments.insert("date".to_string(), json!(tomorrow));
        assert!(ungrounded_arguments(&input, &descriptor, &arguments).is_empty());

        // A date no expression in the conversation resolves to stays
        // ungrounded.
        let next_week = (now.date_naive() + chrono::Duration::days(7))
            .format("%Y-%m-%d")
            .to_string();
        let mut arguments = BTreeMap::new();
        arguments.insert("date".to_string(), json!(next_week));
        assert_eq!(
            ungrounded_arguments(&input, &descriptor, &arguments),
            vec!["date"]
        );
    }

    #[test]
    fn date_parsing_accepts_plain_and_rfc3339_forms() {
        assert_eq!(
            parse_date_value("2026-08-02"),
            NaiveDate::from_ymd_opt(2026, 8, 2)
        );
        assert_eq!(
            parse_date_value("2026-08-02T09:30:00Z"),
            NaiveDate::from_ymd_opt(2026, 8, 2)
        );
        assert_eq!(parse_date_value("next week"), None);
    }

    #[test]
    fn enum_parameters_are_exempt_from_the_guard() {
        let agent = agent();
        let history = vec![customer_event("convert the temperature")];
        let input = ToolCallerInput {
            agent: &agent,
            active: &[],
            terms: &[],
            variables: &[],
            history: &history,
            prior_results: &[],
            now: Utc::now(),
        };

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "unit".to_string(),
            ParameterSchema::required(ParameterType::String, "unit")
                .with_enum(vec!["Celsius".into(), "Fahrenheit".into()]),
        );
        let descriptor = ToolDescriptor {
            id: ToolId::new("weather", "convert"),
            description: "convert".into(),
            parameters,
        };

        let mut arguments = BTreeMap::new();
        arguments.insert("unit".to_string(), json!("Celsius"));
        assert!(ungrounded_arguments(&input, &descriptor, &arguments).is_empty());
    }
}
