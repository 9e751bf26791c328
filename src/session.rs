//! Session records
//!
//! A session binds a customer to an agent. Its conversation lives in the
//! session event log, not on the record itself; events reference the
//! session by id and agents/guidelines are resolved through repositories.

use crate::types::{AgentId, CustomerId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation between one customer and one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub customer_id: CustomerId,
    /// Tags the customer carries; tag-scoped context variables resolve
    /// against this set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customer_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub creation_utc: DateTime<Utc>,
}

impl Session {
    pub fn new(agent_id: AgentId, customer_id: CustomerId) -> Self {
        Self {
            id: SessionId::new(),
            agent_id,
            customer_id,
            customer_tags: Vec::new(),
            title: None,
            creation_utc: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_customer_tag(mut self, tag: impl Into<String>) -> Self {
        self.customer_tags.push(tag.into());
        self
    }
}
