//! Common type definitions used throughout the engine
//!
//! This module provides newtype wrappers around UUID for type-safe
//! identifiers, the `service:name` tool identifier, and the correlation id
//! scheme that ties all events of one turn together.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id! {
    /// Unique identifier for an Agent
    AgentId
}

define_id! {
    /// Unique identifier for a Customer
    CustomerId
}

define_id! {
    /// Unique identifier for a Guideline
    GuidelineId
}

define_id! {
    /// Unique identifier for a guideline connection edge
    ConnectionId
}

define_id! {
    /// Unique identifier for a glossary Term
    TermId
}

define_id! {
    /// Unique identifier for a context variable
    VariableId
}

define_id! {
    /// Unique identifier for a Session
    SessionId
}

define_id! {
    /// Unique identifier for an Event
    EventId
}

define_id! {
    /// Unique identifier for a message Fragment
    FragmentId
}

/// Identifier of a tool, qualified by the service that hosts it.
///
/// Rendered as `service:name`, e.g. `ledger:get_account_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolId {
    pub service: String,
    pub name: String,
}

impl ToolId {
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.name)
    }
}

impl FromStr for ToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((service, name)) if !service.is_empty() && !name.is_empty() => {
                Ok(Self::new(service, name))
            }
            _ => Err(format!("tool id must be `service:name`, got `{}`", s)),
        }
    }
}

impl Serialize for ToolId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ToolId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Correlation id shared by all events of one turn.
///
/// The iteration controller mints a fresh root per turn; sub-stages append
/// dotted segments (`root.<stage>[.<sub>]`). Two ids correlate when they
/// share the same root segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh correlation root for a new turn
    pub fn fresh_root() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Derive a stage-scoped id under this id's root
    pub fn stage(&self, stage: &str) -> Self {
        Self(format!("{}.{}", self.root(), stage))
    }

    /// Derive a sub-scoped id, e.g. `root.propose.batch3`
    pub fn sub(&self, sub: impl fmt::Display) -> Self {
        Self(format!("{}.{}", self.0, sub))
    }

    /// The root segment shared by every id of the same turn
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Whether both ids belong to the same turn
    pub fn correlates_with(&self, other: &CorrelationId) -> bool {
        self.root() == other.root()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
