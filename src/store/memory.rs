//! In-memory repository implementations
//!
//! Thread-safe implementations of every repository trait using maps behind
//! async RwLocks. The event log allocates offsets under the per-session
//! writer lock and wakes long-poll readers through a `Notify` per session.
//! Suitable for tests, the sandbox, and single-instance deployments.

use crate::agent::Agent;
use crate::error::{StoreError, StoreResult};
use crate::event::{Event, NewEvent};
use crate::glossary::Term;
use crate::guideline::{Guideline, GuidelineConnection};
use crate::session::Session;
use crate::store::{
    AgentStore, ConnectionStore, EventFilter, EventLog, GlossaryStore, GuidelineStore,
    SessionStore, TraceStore, VariableStore,
};
use crate::trace::TurnTrace;
use crate::types::{AgentId, CorrelationId, CustomerId, EventId, GuidelineId, SessionId};
use crate::variables::{ContextVariable, VariableScope};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

/// In-memory agents repository
#[derive(Default)]
pub struct InMemoryAgentStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn add_agent(&self, agent: Agent) -> StoreResult<AgentId> {
        let id = agent.id;
        self.agents.write().await.insert(id, agent);
        Ok(id)
    }

    async fn read_agent(&self, id: &AgentId) -> StoreResult<Agent> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("agent {}", id)))
    }
}

/// In-memory guidelines repository
#[derive(Default)]
pub struct InMemoryGuidelineStore {
    by_agent: Arc<RwLock<HashMap<AgentId, Vec<Guideline>>>>,
}

impl InMemoryGuidelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuidelineStore for InMemoryGuidelineStore {
    async fn add_guideline(
        &self,
        agent_id: AgentId,
        guideline: Guideline,
    ) -> StoreResult<GuidelineId> {
        let id = guideline.id;
        self.by_agent
            .write()
            .await
            .entry(agent_id)
            .or_default()
            .push(guideline);
        Ok(id)
    }

    async fn list_guidelines(&self, agent_id: &AgentId) -> StoreResult<Vec<Guideline>> {
        Ok(self
            .by_agent
            .read()
            .await
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn read_guideline(&self, id: &GuidelineId) -> StoreResult<Guideline> {
        self.by_agent
            .read()
            .await
            .values()
            .flatten()
            .find(|g| &g.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("guideline {}", id)))
    }
}

/// In-memory guideline connection edges
#[derive(Default)]
pub struct InMemoryConnectionStore {
    edges: Arc<RwLock<Vec<GuidelineConnection>>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn add_connection(&self, connection: GuidelineConnection) -> StoreResult<()> {
        self.edges.write().await.push(connection);
        Ok(())
    }

    async fn connections_from(
        &self,
        sources: &[GuidelineId],
    ) -> StoreResult<Vec<GuidelineConnection>> {
        Ok(self
            .edges
            .read()
            .await
            .iter()
            .filter(|edge| sources.contains(&edge.source))
            .cloned()
            .collect())
    }
}

/// In-memory glossary
#[derive(Default)]
pub struct InMemoryGlossaryStore {
    terms: Arc<RwLock<Vec<Term>>>,
}

impl InMemoryGlossaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GlossaryStore for InMemoryGlossaryStore {
    async fn add_term(&self, term: Term) -> StoreResult<()> {
        self.terms.write().await.push(term);
        Ok(())
    }

    async fn list_terms(&self) -> StoreResult<Vec<Term>> {
        Ok(self.terms.read().await.clone())
    }
}

/// In-memory context variables
#[derive(Default)]
pub struct InMemoryVariableStore {
    variables: Arc<RwLock<Vec<ContextVariable>>>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn upsert_variable(&self, variable: ContextVariable) -> StoreResult<()> {
        let mut variables = self.variables.write().await;
        if let Some(existing) = variables
            .iter_mut()
            .find(|v| v.name == variable.name && v.scope == variable.scope)
        {
            *existing = variable;
        } else {
            variables.push(variable);
        }
        Ok(())
    }

    async fn list_variables(
        &self,
        customer_id: &CustomerId,
        customer_tags: &[String],
    ) -> StoreResult<Vec<ContextVariable>> {
        let customer = customer_id.to_string();
        Ok(self
            .variables
            .read()
            .await
            .iter()
            .filter(|v| match &v.scope {
                VariableScope::Global => true,
                VariableScope::Customer(c) => c == &customer,
                VariableScope::Tag(tag) => customer_tags.contains(tag),
            })
            .cloned()
            .collect())
    }
}

/// In-memory sessions repository
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: Session) -> StoreResult<SessionId> {
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("session {}", id)));
        }
        sessions.insert(id, session);
        Ok(id)
    }

    async fn read_session(&self, id: &SessionId) -> StoreResult<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))
    }
}

struct SessionLog {
    events: Vec<Event>,
    notify: Arc<Notify>,
}

impl SessionLog {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// In-memory append-only session event log with long-poll support
#[derive(Default)]
pub struct InMemoryEventLog {
    sessions: Arc<RwLock<HashMap<SessionId, SessionLog>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(
        &self,
        session_id: &SessionId,
        filter: &EventFilter,
    ) -> (Vec<Event>, Arc<Notify>) {
        let mut sessions = self.sessions.write().await;
        let log = sessions
            .entry(*session_id)
            .or_insert_with(SessionLog::new);
        (apply_filter(&log.events, filter), log.notify.clone())
    }
}

fn apply_filter(events: &[Event], filter: &EventFilter) -> Vec<Event> {
    events
        .iter()
        .filter(|e| filter.include_deleted || !e.deleted)
        .filter(|e| filter.min_offset.is_none_or(|min| e.offset >= min))
        .filter(|e| {
            filter
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&e.kind()))
        })
        .filter(|e| filter.source.is_none_or(|source| e.source == source))
        .cloned()
        .collect()
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, session_id: &SessionId, event: NewEvent) -> StoreResult<Event> {
        let mut sessions = self.sessions.write().await;
        let log = sessions
            .entry(*session_id)
            .or_insert_with(SessionLog::new);

        // Tombstoned events keep their slots, so the next offset is the
        // vector length and offsets never repeat or leave gaps.
        let offset = log.events.len() as u64;
        let event = Event {
            id: EventId::new(),
            offset,
            creation_utc: Utc::now(),
            source: event.source,
            correlation_id: event
                .correlation_id
                .unwrap_or_else(CorrelationId::fresh_root),
            data: event.data,
            deleted: false,
        };
        trace!(session_id = %session_id, offset, kind = ?event.kind(), "appending event");
        log.events.push(event.clone());
        log.notify.notify_waiters();
        Ok(event)
    }

    async fn list(&self, session_id: &SessionId, filter: EventFilter) -> StoreResult<Vec<Event>> {
        let deadline = filter.wait_for_data.map(|wait| Instant::now() + wait);

        loop {
            let (events, notify) = self.snapshot(session_id, &filter).await;
            if !events.is_empty() {
                return Ok(events);
            }
            let Some(deadline) = deadline else {
                return Ok(events);
            };
            if Instant::now() >= deadline {
                return Ok(events);
            }

            let notified = notify.notified();
            tokio::pin!(notified);
            // Register interest before the re-check so an append landing in
            // between still wakes this reader.
            notified.as_mut().enable();

            let (events, _) = self.snapshot(session_id, &filter).await;
            if !events.is_empty() {
                return Ok(events);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let (events, _) = self.snapshot(session_id, &filter).await;
                return Ok(events);
            }
        }
    }

    async fn read_event(&self, session_id: &SessionId, event_id: &EventId) -> StoreResult<Event> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|log| log.events.iter().find(|e| &e.id == event_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))
    }

    async fn delete_event(&self, session_id: &SessionId, event_id: &EventId) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let log = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;
        let event = log
            .events
            .iter_mut()
            .find(|e| &e.id == event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))?;
        debug!(session_id = %session_id, offset = event.offset, "tombstoning event");
        event.deleted = true;
        Ok(())
    }
}

/// In-memory turn traces, keyed by correlation root
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: Arc<RwLock<HashMap<String, TurnTrace>>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn save_trace(&self, trace: TurnTrace) -> StoreResult<()> {
        self.traces
            .write()
            .await
            .insert(trace.correlation_root.clone(), trace);
        Ok(())
    }

    async fn read_trace(&self, correlation_root: &str) -> StoreResult<TurnTrace> {
        self.traces
            .read()
            .await
            .get(correlation_root)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("trace {}", correlation_root)))
    }
}
