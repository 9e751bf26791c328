//! Message fragments for assembly modes
//!
//! A fragment is a parameterized text template with named `{{slot}}`
//! placeholders. In strict-assembly mode every emitted segment must be an
//! instantiated fragment with all slots filled; fluid-assembly prefers
//! fragments but falls back to free text.

use crate::types::FragmentId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

fn slot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

/// A parameterized text template with named slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub template: String,
}

impl Fragment {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            id: FragmentId::new(),
            template: template.into(),
        }
    }

    /// Slot names referenced by the template, in order of first appearance
    pub fn slots(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for capture in slot_pattern().captures_iter(&self.template) {
            let name = capture[1].to_string();
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
        names
    }

    /// Instantiate the template with the given slot values.
    ///
    /// Returns `Err` with the missing slot names when any placeholder has no
    /// value; strict assembly treats that as "this fragment does not fit".
    pub fn instantiate(&self, values: &BTreeMap<String, String>) -> Result<String, Vec<String>> {
        let missing: Vec<String> = self
            .slots()
            .into_iter()
            .filter(|slot| !values.contains_key(slot))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let rendered = slot_pattern().replace_all(&self.template, |caps: &regex::Captures<'_>| {
            values[&caps[1]].clone()
        });
        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn slots_are_extracted_in_order_without_duplicates() {
        let fragment = Fragment::new("Your {{account}} balance is {{balance}}, {{account}}.");
        assert_eq!(fragment.slots(), vec!["account", "balance"]);
    }

    #[test]
    fn instantiate_fills_all_slots() {
        let fragment = Fragment::new("Your {{ account }} balance is {{balance}}.");
        let rendered = fragment
            .instantiate(&values(&[("account", "checking"), ("balance", "$250")]))
            .unwrap();
        assert_eq!(rendered, "Your checking balance is $250.");
    }

    #[test]
    fn instantiate_reports_missing_slots() {
        let fragment = Fragment::new("Your {{account}} balance is {{balance}}.");
        let err = fragment
            .instantiate(&values(&[("account", "checking")]))
            .unwrap_err();
        assert_eq!(err, vec!["balance"]);
    }

    #[test]
    fn template_without_slots_renders_verbatim() {
        let fragment = Fragment::new("We are open Monday through Friday.");
        assert!(fragment.slots().is_empty());
        assert_eq!(
            fragment.instantiate(&BTreeMap::new()).unwrap(),
            "We are open Monday through Friday."
        );
    }
}
