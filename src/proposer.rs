//! Guideline Proposer
//!
//! Of all guidelines configured for the agent, selects those whose condition
//! holds for the current turn. Candidates are evaluated in interleaved
//! batches through concurrent structured-output requests, the activation set
//! is closed over the `entails` graph, and previously-discharged actions are
//! guarded against pointless re-activation.

use crate::agent::Agent;
use crate::completion::{CompletionRequest, SchematicGenerator};
use crate::error::CompletionError;
use crate::event::{Event, ToolCallRecord};
use crate::glossary::Term;
use crate::guideline::{ActiveGuideline, Guideline, GuidelineConnection};
use crate::prompt;
use crate::variables::ContextVariable;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Everything the proposer reads for one iteration
pub struct ProposerInput<'a> {
    pub agent: &'a Agent,
    pub guidelines: &'a [Guideline],
    pub connections: &'a [GuidelineConnection],
    pub terms: &'a [Term],
    pub variables: &'a [ContextVariable],
    /// Bounded window of recent events
    pub history: &'a [Event],
    /// Tool results from the prior iteration, if any
    pub tool_results: &'a [ToolCallRecord],
}

/// Outcome of one proposal pass
#[derive(Debug, Default)]
pub struct ProposerReport {
    /// Activated guidelines, highest priority first (stable on ties)
    pub active: Vec<ActiveGuideline>,
    /// Batches whose evaluation was skipped after retry exhaustion
    pub skipped_batches: usize,
}

/// Model output for one evaluation batch
#[derive(Debug, Deserialize)]
struct BatchEvaluation {
    evaluations: Vec<CandidateEvaluation>,
}

#[derive(Debug, Deserialize)]
struct CandidateEvaluation {
    /// 1-based position within the batch
    candidate_number: usize,
    condition_holds: bool,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    rationale: String,
    /// The action was already carried out earlier in the conversation
    #[serde(default)]
    previously_applied: bool,
    /// The condition now applies to information not seen when it last fired
    #[serde(default)]
    reapplies_to_new_information: bool,
    /// At least one clause of the action has not been fulfilled yet
    #[serde(default)]
    unfulfilled_clause_remains: bool,
    /// Some clause is inherently continuous (holds for the whole session)
    #[serde(default)]
    continuous_action: bool,
}

fn batch_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "evaluations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "candidate_number": {"type": "integer"},
                        "condition_holds": {"type": "boolean"},
                        "priority": {"type": "integer", "minimum": 1, "maximum": 10},
                        "rationale": {"type": "string"},
                        "previously_applied": {"type": "boolean"},
                        "reapplies_to_new_information": {"type": "boolean"},
                        "unfulfilled_clause_remains": {"type": "boolean"},
                        "continuous_action": {"type": "boolean"}
                    },
                    "required": ["candidate_number", "condition_holds"]
                }
            }
        },
        "required": ["evaluations"]
    })
}

/// Selects the guidelines whose conditions hold for the current turn
pub struct GuidelineProposer {
    generator: SchematicGenerator,
    batch_size: usize,
    parallelism: usize,
}

impl GuidelineProposer {
    pub fn new(generator: SchematicGenerator, batch_size: usize, parallelism: usize) -> Self {
        Self {
            generator,
            batch_size: batch_size.max(1),
            parallelism: parallelism.max(1),
        }
    }

    /// Evaluate every guideline and return the activation set.
    ///
    /// Individual batch failures are skipped with a warning; only
    /// cancellation aborts the pass.
    pub async fn propose(
        &self,
        input: &ProposerInput<'_>,
        token: &CancellationToken,
    ) -> Result<ProposerReport, CompletionError> {
        if input.guidelines.is_empty() {
            return Ok(ProposerReport::default());
        }

        let batches = interleave_batches(input.guidelines, self.batch_size);
        debug!(
            guideline_count = input.guidelines.len(),
            batch_count = batches.len(),
            "evaluating guideline batches"
        );

        let evaluations = stream::iter(batches.into_iter().enumerate().map(|(index, batch)| {
            let token = token.clone();
            async move {
                let result = self.evaluate_batch(input, &batch, index, &token).await;
                (index, batch, result)
            }
        }))
        .buffer_unordered(self.parallelism)
        .collect::<Vec<_>>()
        .await;

        let mut skipped_batches = 0usize;
        // Guideline id → activation, merged across batches. Overlapping
        // appearances keep the highest priority.
        let mut activated: HashMap<crate::types::GuidelineId, ActiveGuideline> = HashMap::new();

        let mut ordered = evaluations;
        ordered.sort_by_key(|(index, _, _)| *index);

        for (index, batch, result) in ordered {
            let evaluations = match result {
                Ok(parsed) => parsed,
                Err(CompletionError::Cancelled) => return Err(CompletionError::Cancelled),
                Err(error) => {
                    warn!(batch = index, error = %error, "evaluation batch skipped");
                    skipped_batches += 1;
                    continue;
                }
            };

            for evaluation in evaluations.evaluations {
                let Some(guideline) = evaluation
                    .candidate_number
                    .checked_sub(1)
                    .and_then(|i| batch.get(i))
                else {
                    warn!(
                        batch = index,
                        candidate = evaluation.candidate_number,
                        "evaluation references an unknown candidate"
                    );
                    continue;
                };

                if !evaluation.condition_holds {
                    continue;
                }
                if !passes_reapplication_guard(&evaluation) {
                    trace!(
                        guideline_id = %guideline.id,
                        "condition holds but action was already fully applied"
                    );
                    continue;
                }

                let mut active = ActiveGuideline::new(
                    (*guideline).clone(),
                    evaluation.priority.unwrap_or(5),
                    evaluation.rationale.clone(),
                );
                active.reapplied =
                    evaluation.previously_applied && evaluation.reapplies_to_new_information;

                activated
                    .entry(guideline.id)
                    .and_modify(|existing| {
                        if active.priority > existing.priority {
                            *existing = active.clone();
                        }
                    })
                    .or_insert(active);
            }
        }

        // Stable order: original guideline order, then priority sort keeps
        // equal priorities in that order.
        let mut active: Vec<ActiveGuideline> = input
            .guidelines
            .iter()
            .filter_map(|g| activated.get(&g.id).cloned())
            .collect();

        self.close_over_connections(input, &mut active, token)
            .await?;

        active.sort_by(|a, b| b.priority.cmp(&a.priority));

        info!(
            active_count = active.len(),
            skipped_batches, "guideline proposal complete"
        );
        Ok(ProposerReport {
            active,
            skipped_batches,
        })
    }

    /// Close the activation set over `entails` edges.
    ///
    /// Targets of active sources are re-evaluated assuming the source
    /// condition holds; activated targets inherit `source.priority - 1`,
    /// floored at 1. Iterates until no edge adds a guideline.
    async fn close_over_connections(
        &self,
        input: &ProposerInput<'_>,
        active: &mut Vec<ActiveGuideline>,
        token: &CancellationToken,
    ) -> Result<(), CompletionError> {
        if input.connections.is_empty() {
            return Ok(());
        }

        let by_id: HashMap<_, _> = input.guidelines.iter().map(|g| (g.id, g)).collect();

        loop {
            let active_ids: HashSet<_> = active.iter().map(|a| a.id()).collect();
            let mut additions = Vec::new();

            for edge in input.connections {
                if !active_ids.contains(&edge.source) || active_ids.contains(&edge.target) {
                    continue;
                }
                let Some(target) = by_id.get(&edge.target).copied() else {
                    continue;
                };
                let Some(source) = active.iter().find(|a| a.id() == edge.source) else {
                    continue;
                };

                if additions
                    .iter()
                    .any(|a: &ActiveGuideline| a.id() == target.id)
                {
                    continue;
                }

                match self
                    .evaluate_entailed(input, source, target, token)
                    .await
                {
                    Ok(Some(rationale)) => {
                        let priority = source.priority.saturating_sub(1).max(1);
                        debug!(
                            source = %edge.source,
                            target = %edge.target,
                            priority,
                            "entailed guideline activated"
                        );
                        additions.push(ActiveGuideline::new(target.clone(), priority, rationale));
                    }
                    Ok(None) => {}
                    Err(CompletionError::Cancelled) => return Err(CompletionError::Cancelled),
                    Err(error) => {
                        warn!(
                            target = %edge.target,
                            error = %error,
                            "entailment evaluation skipped"
                        );
                    }
                }
            }

            if additions.is_empty() {
                return Ok(());
            }
            active.extend(additions);
        }
    }

    async fn evaluate_batch(
        &self,
        input: &ProposerInput<'_>,
        batch: &[&Guideline],
        index: usize,
        token: &CancellationToken,
    ) -> Result<BatchEvaluation, CompletionError> {
        let request = CompletionRequest::new(
            "propose",
            self.system_framing(input, None),
            self.batch_prompt(batch),
            batch_schema(),
        );
        trace!(batch = index, candidates = batch.len(), "evaluating batch");
        self.generator.generate(request, token).await
    }

    /// Focused single-candidate evaluation for an entailed target.
    /// Returns the rationale when the target activates.
    async fn evaluate_entailed(
        &self,
        input: &ProposerInput<'_>,
        source: &ActiveGuideline,
        target: &Guideline,
        token: &CancellationToken,
    ) -> Result<Option<String>, CompletionError> {
        let assumption = format!(
            "Treat the following as established for this conversation: {}",
            source.guideline.condition
        );
        let request = CompletionRequest::new(
            "propose",
            self.system_framing(input, Some(&assumption)),
            self.batch_prompt(&[target]),
            batch_schema(),
        );
        let parsed: BatchEvaluation = self.generator.generate(request, token).await?;

        Ok(parsed
            .evaluations
            .into_iter()
            .find(|e| e.candidate_number == 1 && e.condition_holds)
            .map(|e| {
                if e.rationale.is_empty() {
                    format!("entailed by: {}", source.guideline.condition)
                } else {
                    e.rationale
                }
            }))
    }

    fn system_framing(&self, input: &ProposerInput<'_>, assumption: Option<&str>) -> String {
        let mut framing = format!(
            "You decide which behavioral guidelines currently apply for an AI agent.\n\
             Agent description: {}\n\n\
             Domain glossary:\n{}\n\
             Context variables:\n{}\n\
             Recent conversation:\n{}\n\
             Tool results from this turn:\n{}",
            input.agent.description,
            prompt::render_terms(input.terms),
            prompt::render_variables(input.variables),
            prompt::render_conversation(input.history),
            prompt::render_tool_results(input.tool_results),
        );
        if let Some(assumption) = assumption {
            framing.push('\n');
            framing.push_str(assumption);
        }
        framing
    }

    fn batch_prompt(&self, batch: &[&Guideline]) -> String {
        let mut prompt = String::from(
            "For each candidate below, decide whether its `when` condition holds right now. \
             When it holds, give a priority from 1 (minor) to 10 (must be obeyed), a short \
             rationale, and whether the action was previously applied, whether it re-applies \
             to new information, whether any clause of the action is still unfulfilled, and \
             whether any clause is inherently continuous.\n\n",
        );
        for (index, guideline) in batch.iter().enumerate() {
            prompt.push_str(&format!(
                "Candidate {}: when {}, then {}\n",
                index + 1,
                guideline.condition,
                guideline.action
            ));
        }
        prompt
    }
}

/// The re-application guard: a previously-applied action only fires again
/// when a clause is still open or inherently continuous.
fn passes_reapplication_guard(evaluation: &CandidateEvaluation) -> bool {
    if !evaluation.previously_applied {
        return true;
    }
    evaluation.unfulfilled_clause_remains || evaluation.continuous_action
}

/// Partition guidelines into interleaved batches so each batch mixes
/// candidates from across the configured set rather than clustering
/// neighbors.
fn interleave_batches(guidelines: &[Guideline], batch_size: usize) -> Vec<Vec<&Guideline>> {
    let batch_count = guidelines.len().div_ceil(batch_size);
    let mut batches: Vec<Vec<&Guideline>> = vec![Vec::new(); batch_count];
    for (index, guideline) in guidelines.iter().enumerate() {
        batches[index % batch_count].push(guideline);
    }
    batches
}
