//! # Colloquy: a conversation engine with managed guidelines
//!
//! Colloquy generates responses from a large language model for
//! customer-facing agents under declarative behavioral control. Its
//! distinguishing feature is *managed guidelines*: named condition/action
//! pairs that the engine dynamically selects, evaluates, and enforces on
//! every turn. The engine also resolves domain glossary, drives controlled
//! tool invocations, and assembles a final reply that respects all active
//! guidelines.
//!
//! ## The pipeline
//!
//! ```text
//! Trigger → ( Glossary → Proposer → ToolCaller )* → MessageGenerator → Event Log
//!              ↑______ loop until tool results stop changing ______|
//! ```
//!
//! Each turn, the [`engine::AlphaEngine`]:
//!
//! 1. retrieves the glossary terms relevant to the conversation,
//! 2. evaluates every configured guideline in concurrent batches and keeps
//!    the ones whose condition holds (with priority and rationale),
//! 3. decides and executes the tool calls those guidelines warrant,
//! 4. repeats 1–3 while tool results keep changing the picture (bounded by
//!    the agent's iteration cap), and
//! 5. composes the final message(s), constrained by glossary, guidelines,
//!    priorities, and tool results.
//!
//! Everything the engine reads and writes flows through the append-only
//! session event log, and every event of a turn shares a correlation root.
//!
//! ## Quick start
//!
//! ```no_run
//! use colloquy::{
//!     Agent, AlphaEngine, EngineStores, Guideline, NewEvent, OpenAiCompletion, Session,
//! };
//! use colloquy::store::{AgentStore, GuidelineStore, SessionStore};
//! use colloquy::types::CustomerId;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = EngineStores::in_memory();
//!
//! let agent = Agent::new("Support", "A polite customer support agent");
//! let agent_id = stores.agents.add_agent(agent).await?;
//! stores
//!     .guidelines
//!     .add_guideline(
//!         agent_id,
//!         Guideline::new("the customer is thirsty", "offer a Pepsi"),
//!     )
//!     .await?;
//!
//! let session = Session::new(agent_id, CustomerId::new());
//! let session_id = stores.sessions.create_session(session).await?;
//!
//! let engine = AlphaEngine::builder()
//!     .stores(stores)
//!     .completion(Arc::new(OpenAiCompletion::from_env()?))
//!     .build()?;
//!
//! engine
//!     .create_event(session_id, NewEvent::customer_message("I'm thirsty"))
//!     .await?;
//! let outcome = engine.process(session_id, CancellationToken::new()).await?;
//!
//! for message in &outcome.messages {
//!     println!("Agent: {}", message.message_text().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module overview
//!
//! - [`engine`]: the iteration controller, status protocol, and session API
//! - [`proposer`]: batched guideline evaluation and entailment closure
//! - [`toolcaller`]: controlled tool invocation with argument grounding
//! - [`generator`]: message composition (fluid / fluid-assembly / strict)
//! - [`glossary`]: term retrieval (lexical + vector seam)
//! - [`completion`]: structured-output LLM adapter with retries
//! - [`store`]: repository traits and in-memory implementations
//! - [`event`] / [`session`] / [`trace`]: the session event log data model
//! - [`tool`]: tool protocol, schemas, and registry
//! - [`guideline`] / [`agent`] / [`variables`] / [`fragment`]: domain records

// Core type definitions
pub mod types;

// Error types
pub mod error;

// Domain records
pub mod agent;
pub mod fragment;
pub mod guideline;
pub mod session;
pub mod variables;

// The session event log data model
pub mod event;
pub mod trace;

// Glossary retrieval
pub mod glossary;

// Tool protocol
pub mod tool;

// Repositories
pub mod store;

// Structured-output completion
pub mod completion;

// Engine configuration
pub mod config;

// Pipeline stages
pub mod generator;
pub mod proposer;
pub mod toolcaller;

// The iteration controller
pub mod engine;

// Prompt section rendering shared by the stages
mod prompt;

pub use agent::{Agent, CompositionMode};
pub use completion::{CompletionRequest, OpenAiCompletion, SchematicCompletion, SchematicGenerator};
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{AlphaEngine, AlphaEngineBuilder, EngineStores, TurnOutcome};
pub use error::{CompletionError, EngineError, Result, StoreError, ToolError};
pub use event::{
    Event, EventData, EventKind, EventSource, NewEvent, Status, ToolCallRecord, ToolCallResult,
    ToolControl, UtteranceReason,
};
pub use fragment::Fragment;
pub use generator::UtteranceRequest;
pub use glossary::{GlossaryRetriever, Term, TermIndex};
pub use guideline::{ActiveGuideline, ConnectionKind, Guideline, GuidelineConnection};
pub use session::Session;
pub use store::{EventFilter, EventLog};
pub use tool::{ParameterSchema, ParameterType, Tool, ToolDescriptor, ToolOutcome, ToolRegistry};
pub use trace::{TraceNote, TurnTrace};
pub use types::{AgentId, CorrelationId, CustomerId, EventId, GuidelineId, SessionId, ToolId};
pub use variables::{ContextVariable, VariableScope};
