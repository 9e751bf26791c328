//! Repository abstractions
//!
//! The engine consumes persistence through these traits and never touches a
//! backend directly. Reads are idempotent with weak consistency; writes are
//! linearizable within a single entity. The in-memory implementations in
//! [`memory`] back tests and the sandbox.

use crate::agent::Agent;
use crate::error::StoreResult;
use crate::event::{Event, EventKind, EventSource, NewEvent};
use crate::glossary::Term;
use crate::guideline::{Guideline, GuidelineConnection};
use crate::session::Session;
use crate::trace::TurnTrace;
use crate::types::{AgentId, CustomerId, EventId, GuidelineId, SessionId};
use crate::variables::ContextVariable;
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;

/// Agents repository; the engine only reads
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn add_agent(&self, agent: Agent) -> StoreResult<AgentId>;
    async fn read_agent(&self, id: &AgentId) -> StoreResult<Agent>;
}

/// Guidelines repository, per agent
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    async fn add_guideline(&self, agent_id: AgentId, guideline: Guideline)
        -> StoreResult<GuidelineId>;
    async fn list_guidelines(&self, agent_id: &AgentId) -> StoreResult<Vec<Guideline>>;
    async fn read_guideline(&self, id: &GuidelineId) -> StoreResult<Guideline>;
}

/// Guideline connection edges
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn add_connection(&self, connection: GuidelineConnection) -> StoreResult<()>;
    /// All edges whose source is one of the given guidelines
    async fn connections_from(
        &self,
        sources: &[GuidelineId],
    ) -> StoreResult<Vec<GuidelineConnection>>;
}

/// Glossary terms
#[async_trait]
pub trait GlossaryStore: Send + Sync {
    async fn add_term(&self, term: Term) -> StoreResult<()>;
    async fn list_terms(&self) -> StoreResult<Vec<Term>>;
}

/// Context variables, resolved per customer: customer-scoped values for
/// that customer, tag-scoped values for any tag the customer carries, and
/// global values for everyone
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn upsert_variable(&self, variable: ContextVariable) -> StoreResult<()>;
    async fn list_variables(
        &self,
        customer_id: &CustomerId,
        customer_tags: &[String],
    ) -> StoreResult<Vec<ContextVariable>>;
}

/// Sessions repository
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: Session) -> StoreResult<SessionId>;
    async fn read_session(&self, id: &SessionId) -> StoreResult<Session>;
}

/// Filter for event log reads
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events with offset >= this value
    pub min_offset: Option<u64>,
    /// Only events of these kinds
    pub kinds: Option<Vec<EventKind>>,
    /// Only events from this source
    pub source: Option<EventSource>,
    /// Long-poll: block up to this long when nothing matches yet
    pub wait_for_data: Option<Duration>,
    /// Store-level visibility; engine readers leave this false
    pub include_deleted: bool,
}

impl EventFilter {
    pub fn from_offset(min_offset: u64) -> Self {
        Self {
            min_offset: Some(min_offset),
            ..Default::default()
        }
    }

    pub fn kinds(mut self, kinds: Vec<EventKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn wait_for_data(mut self, wait: Duration) -> Self {
        self.wait_for_data = Some(wait);
        self
    }
}

/// Append-only, offset-ordered session event log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event; offset allocation is atomic per session
    async fn append(&self, session_id: &SessionId, event: NewEvent) -> StoreResult<Event>;

    /// Read events matching the filter. With `wait_for_data` set, blocks up
    /// to that long for the first match, then returns whatever is available
    /// (possibly nothing).
    async fn list(&self, session_id: &SessionId, filter: EventFilter) -> StoreResult<Vec<Event>>;

    async fn read_event(&self, session_id: &SessionId, event_id: &EventId) -> StoreResult<Event>;

    /// Tombstone an event; it remains in the store but disappears from all
    /// engine inputs
    async fn delete_event(&self, session_id: &SessionId, event_id: &EventId) -> StoreResult<()>;
}

/// Per-turn reasoning traces, keyed by correlation root
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn save_trace(&self, trace: TurnTrace) -> StoreResult<()>;
    async fn read_trace(&self, correlation_root: &str) -> StoreResult<TurnTrace>;
}
