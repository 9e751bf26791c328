//! The Alpha Engine
//!
//! Per-session iteration controller coordinating the glossary retriever, the
//! guideline proposer, the tool caller, and the message generator around the
//! session event log. Drives one turn at a time per session, emits the
//! lifecycle status protocol, enforces the iteration cap and the wall clock
//! cap, and propagates cooperative cancellation into every stage.

use crate::agent::Agent;
use crate::completion::{SchematicCompletion, SchematicGenerator};
use crate::config::{EngineConfig, RetryPolicy};
use crate::error::{CompletionError, EngineError, Result};
use crate::event::{
    Event, EventData, EventSource, NewEvent, Status, ToolCallRecord, ToolControl,
};
use crate::fragment::Fragment;
use crate::generator::{GeneratorInput, MessageGenerator, UtteranceRequest};
use crate::glossary::{GlossaryRetriever, TermIndex};
use crate::proposer::{GuidelineProposer, ProposerInput};
use crate::session::Session;
use crate::store::{
    AgentStore, ConnectionStore, EventFilter, EventLog, GlossaryStore, GuidelineStore,
    SessionStore, TraceStore, VariableStore,
};
use crate::tool::ToolRegistry;
use crate::toolcaller::{PendingInfo, ToolCaller, ToolCallerInput};
use crate::trace::TurnTrace;
use crate::types::{CorrelationId, EventId, SessionId};
use crate::variables::ContextVariable;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// The repositories the engine depends on. Process-wide resources with
/// explicit lifecycles, injected here rather than reached through globals.
#[derive(Clone)]
pub struct EngineStores {
    pub agents: Arc<dyn AgentStore>,
    pub guidelines: Arc<dyn GuidelineStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub glossary: Arc<dyn GlossaryStore>,
    pub variables: Arc<dyn VariableStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub events: Arc<dyn EventLog>,
    pub traces: Arc<dyn TraceStore>,
}

impl EngineStores {
    /// All-in-memory stores, for tests and the sandbox
    pub fn in_memory() -> Self {
        use crate::store::memory::*;
        Self {
            agents: Arc::new(InMemoryAgentStore::new()),
            guidelines: Arc::new(InMemoryGuidelineStore::new()),
            connections: Arc::new(InMemoryConnectionStore::new()),
            glossary: Arc::new(InMemoryGlossaryStore::new()),
            variables: Arc::new(InMemoryVariableStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            events: Arc::new(InMemoryEventLog::new()),
            traces: Arc::new(InMemoryTraceStore::new()),
        }
    }
}

/// What one turn produced
#[derive(Debug)]
pub struct TurnOutcome {
    pub correlation_root: String,
    /// Appended message events, in order
    pub messages: Vec<Event>,
    /// Iterations the fixpoint loop ran
    pub iterations: u32,
    /// The iteration cap was hit while tool results were still changing
    pub exhausted: bool,
}

/// Builder for [`AlphaEngine`]
pub struct AlphaEngineBuilder {
    stores: Option<EngineStores>,
    registry: Option<Arc<ToolRegistry>>,
    adapter: Option<Arc<dyn SchematicCompletion>>,
    term_index: Option<Arc<dyn TermIndex>>,
    fragments: Vec<Fragment>,
    config: EngineConfig,
    retry_policy: RetryPolicy,
}

impl AlphaEngineBuilder {
    pub fn new() -> Self {
        Self {
            stores: None,
            registry: None,
            adapter: None,
            term_index: None,
            fragments: Vec::new(),
            config: EngineConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn stores(mut self, stores: EngineStores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn completion(mut self, adapter: Arc<dyn SchematicCompletion>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn term_index(mut self, index: Arc<dyn TermIndex>) -> Self {
        self.term_index = Some(index);
        self
    }

    pub fn fragments(mut self, fragments: Vec<Fragment>) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> Result<AlphaEngine> {
        let stores = self
            .stores
            .ok_or_else(|| EngineError::Configuration("stores are required".into()))?;
        let adapter = self
            .adapter
            .ok_or_else(|| EngineError::Configuration("a completion adapter is required".into()))?;
        let registry = self.registry.unwrap_or_default();
        let generator = SchematicGenerator::new(adapter, self.retry_policy);

        Ok(AlphaEngine {
            proposer: GuidelineProposer::new(
                generator.clone(),
                self.config.batch_size,
                self.config.proposer_parallelism,
            ),
            tool_caller: ToolCaller::new(
                generator.clone(),
                Arc::clone(&registry),
                self.config.tool_parallelism,
                self.config.tool_timeout,
            ),
            message_generator: MessageGenerator::new(generator),
            glossary: GlossaryRetriever::new(Arc::clone(&stores.glossary), self.term_index)
                .with_limit(self.config.glossary_limit),
            stores,
            fragments: self.fragments,
            config: self.config,
            session_locks: Mutex::new(HashMap::new()),
        })
    }
}

impl Default for AlphaEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-session response pipeline
pub struct AlphaEngine {
    stores: EngineStores,
    glossary: GlossaryRetriever,
    proposer: GuidelineProposer,
    tool_caller: ToolCaller,
    message_generator: MessageGenerator,
    fragments: Vec<Fragment>,
    config: EngineConfig,
    /// One turn per session at a time; different sessions run in parallel
    session_locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl AlphaEngine {
    pub fn builder() -> AlphaEngineBuilder {
        AlphaEngineBuilder::new()
    }

    /// Drive exactly one turn for the session.
    #[instrument(skip(self, token), fields(session_id = %session_id))]
    pub async fn process(
        &self,
        session_id: SessionId,
        token: CancellationToken,
    ) -> Result<TurnOutcome> {
        self.run_locked(session_id, token, None).await
    }

    /// Produce a single proactive message aligned with the requested action,
    /// bypassing the customer-prompt requirement.
    #[instrument(skip(self, request, token), fields(session_id = %session_id))]
    pub async fn utter(
        &self,
        session_id: SessionId,
        request: UtteranceRequest,
        token: CancellationToken,
    ) -> Result<TurnOutcome> {
        self.run_locked(session_id, token, Some(request)).await
    }

    /// Append an event through the session API.
    pub async fn create_event(&self, session_id: SessionId, event: NewEvent) -> Result<Event> {
        self.stores.sessions.read_session(&session_id).await?;
        Ok(self.stores.events.append(&session_id, event).await?)
    }

    /// List events, optionally long-polling. The wait is clamped to the
    /// configured cap so readers cannot starve writers.
    pub async fn list_events(
        &self,
        session_id: SessionId,
        mut filter: EventFilter,
    ) -> Result<Vec<Event>> {
        if let Some(wait) = filter.wait_for_data {
            filter.wait_for_data = Some(wait.min(self.config.long_poll_cap));
        }
        Ok(self.stores.events.list(&session_id, filter).await?)
    }

    /// Tombstone an event.
    pub async fn delete_event(&self, session_id: SessionId, event_id: EventId) -> Result<()> {
        Ok(self.stores.events.delete_event(&session_id, &event_id).await?)
    }

    /// Expose the reasoning trace of the turn that produced an event.
    pub async fn inspect_event(
        &self,
        session_id: SessionId,
        event_id: EventId,
    ) -> Result<TurnTrace> {
        let event = self.stores.events.read_event(&session_id, &event_id).await?;
        Ok(self
            .stores
            .traces
            .read_trace(event.correlation_id.root())
            .await?)
    }

    async fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        Arc::clone(locks.entry(session_id).or_default())
    }

    async fn run_locked(
        &self,
        session_id: SessionId,
        token: CancellationToken,
        utterance: Option<UtteranceRequest>,
    ) -> Result<TurnOutcome> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let session = self
            .stores
            .sessions
            .read_session(&session_id)
            .await
            .map_err(|_| EngineError::SessionNotFound(session_id))?;
        let agent = self
            .stores
            .agents
            .read_agent(&session.agent_id)
            .await
            .map_err(|_| EngineError::AgentNotFound(session.agent_id))?;

        let root = CorrelationId::fresh_root();
        let trigger_offset = self.trigger_offset(&session_id).await?;
        let mut trace = TurnTrace::new(root.root());

        self.emit_status(&session_id, &root, Status::Acknowledged, trigger_offset)
            .await?;

        let turn = tokio::time::timeout(
            self.config.turn_timeout,
            self.run_turn(
                &session,
                &agent,
                &root,
                trigger_offset,
                &token,
                utterance.as_ref(),
                &mut trace,
            ),
        )
        .await;

        let result = match turn {
            Ok(result) => result,
            Err(_) => Err(EngineError::TurnTimeout {
                session_id,
                cap: self.config.turn_timeout,
            }),
        };

        self.stores.traces.save_trace(trace).await?;

        match result {
            Ok(outcome) => {
                self.emit_status(&session_id, &root, Status::Ready, trigger_offset)
                    .await?;
                Ok(outcome)
            }
            Err(error) if error.is_cancellation() => {
                warn!(session_id = %session_id, "turn cancelled");
                self.emit_status(&session_id, &root, Status::Cancelled, trigger_offset)
                    .await?;
                self.emit_status(&session_id, &root, Status::Ready, trigger_offset)
                    .await?;
                Err(error)
            }
            Err(error) => {
                warn!(session_id = %session_id, error = %error, "turn failed");
                self.emit_status(&session_id, &root, Status::Error, trigger_offset)
                    .await?;
                self.emit_status(&session_id, &root, Status::Ready, trigger_offset)
                    .await?;
                Err(error)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        session: &Session,
        agent: &Agent,
        root: &CorrelationId,
        trigger_offset: i64,
        token: &CancellationToken,
        utterance: Option<&UtteranceRequest>,
        trace: &mut TurnTrace,
    ) -> Result<TurnOutcome> {
        let session_id = session.id;
        self.check_cancelled(session_id, token)?;
        self.emit_status(&session_id, root, Status::Processing, trigger_offset)
            .await?;

        let guidelines = self.stores.guidelines.list_guidelines(&agent.id).await?;
        let guideline_ids: Vec<_> = guidelines.iter().map(|g| g.id).collect();
        let connections = self.stores.connections.connections_from(&guideline_ids).await?;
        let variables = self.fresh_variables(session, trace).await?;

        let mut active = Vec::new();
        let mut all_records: Vec<ToolCallRecord> = Vec::new();
        let mut last_records: Vec<ToolCallRecord> = Vec::new();
        let mut pending: Vec<PendingInfo> = Vec::new();
        let mut prev_digests: Option<BTreeSet<String>> = None;
        let mut terms = Vec::new();
        let mut iterations = 0u32;
        let mut exhausted = false;

        // The fixpoint loop. Skipped entirely for utterance requests, which
        // only buy time or follow up on an action.
        if utterance.is_none() {
            for iteration in 1..=agent.max_iterations {
                iterations = iteration;
                self.check_cancelled(session_id, token)?;

                let history = self.history(&session_id).await?;

                // Glossary first, so the proposer and everything after can
                // resolve domain vocabulary. Failure is never fatal here.
                let guideline_texts: Vec<String> = active
                    .iter()
                    .map(|a: &crate::guideline::ActiveGuideline| {
                        format!("{} {}", a.guideline.condition, a.guideline.action)
                    })
                    .collect();
                let conversation = format!(
                    "{}\n{}",
                    agent.description,
                    crate::prompt::render_conversation(&history)
                );
                terms = match self.glossary.retrieve(&conversation, &guideline_texts).await {
                    Ok(terms) => terms,
                    Err(error) => {
                        warn!(error = %error, "glossary retrieval failed; continuing without terms");
                        Vec::new()
                    }
                };

                let report = self
                    .proposer
                    .propose(
                        &ProposerInput {
                            agent,
                            guidelines: &guidelines,
                            connections: &connections,
                            terms: &terms,
                            variables: &variables,
                            history: &history,
                            tool_results: &last_records,
                        },
                        token,
                    )
                    .await
                    .map_err(|e| self.map_completion_error(session_id, e))?;

                if report.skipped_batches > 0 {
                    trace.note(
                        "propose",
                        format!("{} evaluation batch(es) skipped", report.skipped_batches),
                    );
                }
                active = report.active;
                for entry in &active {
                    trace.note(
                        "propose",
                        format!(
                            "activated (priority {}): when {} — {}",
                            entry.priority, entry.guideline.condition, entry.rationale
                        ),
                    );
                }

                if !active.iter().any(|a| a.guideline.has_tools()) {
                    debug!(iteration, "no tool associations; leaving the loop");
                    break;
                }

                let stage: crate::toolcaller::ToolCallerOutcome = unimplemented!();
                pending = stage.pending;
                for shortfall in &pending {
                    trace.note(
                        "tools",
                        format!(
                            "{} not called: missing {}",
                            shortfall.tool_id,
                            shortfall.missing.join(", ")
                        ),
                    );
                }

                if stage.calls.is_empty() {
                    debug!(iteration, "no new tool calls; loop converged");
                    break;
                }

                // One tool event per iteration carrying all of its calls.
                self.stores
                    .events
                    .append(
                        &session_id,
                        NewEvent {
                            source: EventSource::AiAgent,
                            data: EventData::Tool {
                                calls: stage.calls.clone(),
                            },
                            correlation_id: Some(root.stage("tools").sub(iteration)),
                        },
                    )
                    .await?;

                let digests: BTreeSet<String> =
                    stage.calls.iter().map(result_digest).collect();
                let refresh_requested = stage.calls.iter().any(|call| {
                    call.result.control == Some(ToolControl::RefreshGuidelines)
                });

                all_records.extend(stage.calls.clone());

                if !refresh_requested && prev_digests.as_ref() == Some(&digests) {
                    debug!(iteration, "tool results unchanged; loop converged");
                    break;
                }
                prev_digests = Some(digests);
                last_records = stage.calls;

                if iteration == agent.max_iterations {
                    exhausted = true;
                    trace.note(
                        "controller",
                        "iteration cap reached with changing tool results",
                    );
                }
            }
        }

        self.check_cancelled(session_id, token)?;
        self.emit_status(&session_id, root, Status::Typing, trigger_offset)
            .await?;

        let history = self.history(&session_id).await?;
        if utterance.is_some() {
            let conversation = format!(
                "{}\n{}",
                agent.description,
                crate::prompt::render_conversation(&history)
            );
            terms = match self.glossary.retrieve(&conversation, &[]).await {
                Ok(terms) => terms,
                Err(error) => {
                    warn!(error = %error, "glossary retrieval failed; continuing without terms");
                    Vec::new()
                }
            };
        }
        let generated = self
            .message_generator
            .generate(
                &GeneratorInput {
                    agent,
                    history: &history,
                    active: &active,
                    terms: &terms,
                    variables: &variables,
                    tool_results: &all_records,
                    pending: &pending,
                    fragments: &self.fragments,
                    utterance,
                },
                token,
            )
            .await
            .map_err(|e| self.map_completion_error(session_id, e))?;

        for note in &generated.notes {
            trace.note("generate", note.clone());
        }

        // A cancellation landing during generation discards the draft: no
        // message event is appended for this turn.
        self.check_cancelled(session_id, token)?;

        let mut messages = Vec::new();
        for text in generated.messages {
            let event = self
                .stores
                .events
                .append(
                    &session_id,
                    NewEvent {
                        source: EventSource::AiAgent,
                        data: EventData::Message {
                            text,
                            utterance_reason: utterance.map(|u| u.reason),
                        },
                        correlation_id: Some(root.clone()),
                    },
                )
                .await?;
            messages.push(event);
        }

        trace.active_guidelines = active;
        trace.tool_calls = all_records;

        info!(
            message_count = messages.len(),
            iterations, exhausted, "turn complete"
        );
        Ok(TurnOutcome {
            correlation_root: root.root().to_string(),
            messages,
            iterations,
            exhausted,
        })
    }

    /// Offset of the latest visible customer message, or -1 when the turn
    /// is proactive
    async fn trigger_offset(&self, session_id: &SessionId) -> Result<i64> {
        let events = self
            .stores
            .events
            .list(session_id, EventFilter::default())
            .await?;
        Ok(events
            .iter()
            .rev()
            .find(|event| event.is_customer_message())
            .map(|event| event.offset as i64)
            .unwrap_or(-1))
    }

    /// The bounded window of visible events feeding prompts
    async fn history(&self, session_id: &SessionId) -> Result<Vec<Event>> {
        let mut events = self
            .stores
            .events
            .list(session_id, EventFilter::default())
            .await?;
        if events.len() > self.config.history_window {
            events = events.split_off(events.len() - self.config.history_window);
        }
        Ok(events)
    }

    /// Context variables with stale values filtered out and noted
    async fn fresh_variables(
        &self,
        session: &Session,
        trace: &mut TurnTrace,
    ) -> Result<Vec<ContextVariable>> {
        let now = Utc::now();
        let all = self
            .stores
            .variables
            .list_variables(&session.customer_id, &session.customer_tags)
            .await?;
        let (fresh, stale): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|v| !v.is_stale(now));
        for variable in &stale {
            trace.note(
                "controller",
                format!("context variable `{}` is stale and was excluded", variable.name),
            );
        }
        Ok(fresh)
    }

    async fn emit_status(
        &self,
        session_id: &SessionId,
        root: &CorrelationId,
        status: Status,
        trigger_offset: i64,
    ) -> Result<Event> {
        Ok(self
            .stores
            .events
            .append(
                session_id,
                NewEvent {
                    source: EventSource::AiAgent,
                    data: EventData::Status {
                        status,
                        trigger_offset,
                    },
                    correlation_id: Some(root.clone()),
                },
            )
            .await?)
    }

    fn check_cancelled(&self, session_id: SessionId, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            Err(EngineError::Cancelled(session_id))
        } else {
            Ok(())
        }
    }

    fn map_completion_error(&self, session_id: SessionId, error: CompletionError) -> EngineError {
        match error {
            CompletionError::Cancelled => EngineError::Cancelled(session_id),
            other => EngineError::Completion(other),
        }
    }
}

/// Digest of one call's result for the convergence comparison. Metadata is
/// excluded: only data and error changes can change the guideline set.
fn result_digest(record: &ToolCallRecord) -> String {
    serde_json::json!({
        "tool": record.tool_id.to_string(),
        "arguments": record.arguments,
        "data": record.result.data,
        "error": record.result.error,
    })
    .to_string()
}
