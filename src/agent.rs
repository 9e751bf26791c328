//! Agent records
//!
//! Agents are created and managed outside the engine; the engine reads them
//! through the [`AgentStore`](crate::store::AgentStore) repository. The
//! description is the agent's free-text persona and feeds every prompt the
//! engine assembles.

use crate::types::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the message generator mixes free text and fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompositionMode {
    /// Free-form natural language constrained by guidelines, glossary, and
    /// tool results
    #[default]
    Fluid,
    /// Prefer provided fragments where they fit; free text allowed otherwise
    FluidAssembly,
    /// Only instantiated fragments may appear; no fitting combination means
    /// no message
    StrictAssembly,
}

/// A customer-facing agent under declarative behavioral control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Free-text role/persona; feeds every prompt
    pub description: String,
    /// Cap on glossary→propose→tools iterations per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub composition_mode: CompositionMode,
    pub creation_utc: DateTime<Utc>,
}

fn default_max_iterations() -> u32 {
    3
}

impl Agent {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            description: description.into(),
            max_iterations: default_max_iterations(),
            composition_mode: CompositionMode::default(),
            creation_utc: Utc::now(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_composition_mode(mut self, mode: CompositionMode) -> Self {
        self.composition_mode = mode;
        self
    }
}
