//! Context variables
//!
//! Key/value pairs scoped to a customer, a tag, or globally. Values may be
//! refreshed via tools; a freshness rule marks how long a value stays
//! usable. Stale values are excluded from prompts and reported as stale in
//! the turn trace.

use crate::types::VariableId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Scope a context variable applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum VariableScope {
    /// Applies to a single customer
    Customer(String),
    /// Applies to every customer carrying the tag
    Tag(String),
    /// Applies to all sessions of the agent
    Global,
}

/// A named value available to every pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextVariable {
    pub id: VariableId,
    pub name: String,
    pub value: serde_json::Value,
    pub scope: VariableScope,
    /// Maximum age in seconds before the value is considered stale.
    /// `None` means the value never goes stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_seconds: Option<i64>,
    pub last_modified_utc: DateTime<Utc>,
}

impl ContextVariable {
    pub fn global(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            id: VariableId::new(),
            name: name.into(),
            value,
            scope: VariableScope::Global,
            freshness_seconds: None,
            last_modified_utc: Utc::now(),
        }
    }

    pub fn for_customer(
        name: impl Into<String>,
        value: serde_json::Value,
        customer: impl Into<String>,
    ) -> Self {
        Self {
            id: VariableId::new(),
            name: name.into(),
            value,
            scope: VariableScope::Customer(customer.into()),
            freshness_seconds: None,
            last_modified_utc: Utc::now(),
        }
    }

    pub fn for_tag(
        name: impl Into<String>,
        value: serde_json::Value,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            id: VariableId::new(),
            name: name.into(),
            value,
            scope: VariableScope::Tag(tag.into()),
            freshness_seconds: None,
            last_modified_utc: Utc::now(),
        }
    }

    pub fn with_freshness_seconds(mut self, seconds: i64) -> Self {
        self.freshness_seconds = Some(seconds);
        self
    }

    /// Whether the value is past its freshness rule at `now`
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.freshness_seconds {
            Some(seconds) => now - self.last_modified_utc > Duration::seconds(seconds),
            None => false,
        }
    }

    /// Replace the value and reset the freshness clock
    pub fn refresh(&mut self, value: serde_json::Value) {
        self.value = value;
        self.last_modified_utc = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variable_without_rule_never_goes_stale() {
        let var = ContextVariable::global("plan", json!("premium"));
        let far_future = Utc::now() + Duration::days(365);
        assert!(!var.is_stale(far_future));
    }

    #[test]
    fn variable_with_rule_goes_stale() {
        let var = ContextVariable::global("balance", json!(100)).with_freshness_seconds(60);
        assert!(!var.is_stale(Utc::now()));
        assert!(var.is_stale(Utc::now() + Duration::seconds(61)));
    }

    #[test]
    fn refresh_resets_the_clock() {
        let mut var = ContextVariable::global("balance", json!(100)).with_freshness_seconds(60);
        var.last_modified_utc = Utc::now() - Duration::seconds(120);
        assert!(var.is_stale(Utc::now()));

        var.refresh(json!(250));
        assert!(!var.is_stale(Utc::now()));
        assert_eq!(var.value, json!(250));
    }

    #[test]
    fn scope_serializes_tagged() {
        let scope = VariableScope::Customer("scooby".into());
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"kind":"customer","value":"scooby"}"#);

        let back: VariableScope = serde_json::from_str(r#"{"kind":"global"}"#).unwrap();
        assert_eq!(back, VariableScope::Global);
    }
}
