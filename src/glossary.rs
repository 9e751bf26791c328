//! Domain glossary retrieval
//!
//! Resolves the terms relevant to the current context so every downstream
//! stage can interpret domain-specific vocabulary. Relevance combines
//! vector similarity (through the abstract [`TermIndex`] seam) with lexical
//! name/synonym matching, and terms named by an active guideline are always
//! included.

use crate::error::StoreResult;
use crate::store::GlossaryStore;
use crate::types::TermId;
use aho_corasick::AhoCorasickBuilder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A glossary term with its synonyms and definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    pub definition: String,
}

impl Term {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: TermId::new(),
            name: name.into(),
            synonyms: Vec::new(),
            definition: definition.into(),
        }
    }

    pub fn with_synonym(mut self, synonym: impl Into<String>) -> Self {
        self.synonyms.push(synonym.into());
        self
    }
}

/// Abstract vector index over glossary terms.
///
/// Embedders and vector stores live outside the engine; this seam returns
/// term ids ranked by similarity to a query.
#[async_trait]
pub trait TermIndex: Send + Sync {
    async fn similar_terms(&self, query: &str, limit: usize) -> StoreResult<Vec<TermId>>;
}

/// Retrieves the bounded set of terms relevant to the current turn
pub struct GlossaryRetriever {
    store: Arc<dyn GlossaryStore>,
    index: Option<Arc<dyn TermIndex>>,
    /// Upper bound on returned terms (K)
    limit: usize,
}

impl GlossaryRetriever {
    pub fn new(store: Arc<dyn GlossaryStore>, index: Option<Arc<dyn TermIndex>>) -> Self {
        Self {
            store,
            index,
            limit: 20,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Retrieve up to K terms for the turn.
    ///
    /// `conversation` is the recent conversation text plus the agent
    /// description; `guideline_texts` are the conditions and actions of the
    /// currently active guidelines. Terms named there are always included,
    /// even past the K bound. A missing index degrades to lexical matching
    /// with a warning, never an error.
    pub async fn retrieve(
        &self,
        conversation: &str,
        guideline_texts: &[String],
    ) -> StoreResult<Vec<Term>> {
        let all_terms = self.store.list_terms().await?;
        if all_terms.is_empty() {
            trace!("glossary is empty");
            return Ok(Vec::new());
        }

        let mut selected: Vec<Term> = Vec::new();
        let mut seen: HashSet<TermId> = HashSet::new();

        // Terms whose exact name appears in an active guideline are load-bearing
        // for interpreting that guideline and must always flow downstream.
        for term in &all_terms {
            let mentioned = guideline_texts.iter().any(|text| {
                contains_word(text, &term.name)
                    || term.synonyms.iter().any(|s| contains_word(text, s))
            });
            if mentioned && seen.insert(term.id) {
                selected.push(term.clone());
            }
        }

        // Lexical pass over the conversation, case-insensitive automaton over
        // every name and synonym.
        let mut patterns: Vec<String> = Vec::new();
        let mut pattern_owner: Vec<usize> = Vec::new();
        for (idx, term) in all_terms.iter().enumerate() {
            patterns.push(term.name.clone());
            pattern_owner.push(idx);
            for synonym in &term.synonyms {
                patterns.push(synonym.clone());
                pattern_owner.push(idx);
            }
        }
        let automaton = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .map_err(|e| crate::error::StoreError::Internal(e.to_string()))?;

        for hit in automaton.find_iter(conversation) {
            let term = &all_terms[pattern_owner[hit.pattern().as_usize()]];
            if selected.len() >= self.limit {
                break;
            }
            if seen.insert(term.id) {
                selected.push(term.clone());
            }
        }

        // Vector pass fills whatever room is left under K.
        if selected.len() < self.limit {
            match &self.index {
                Some(index) => {
                    let room = self.limit - selected.len();
                    let similar = index.similar_terms(conversation, room).await?;
                    for id in similar {
                        if selected.len() >= self.limit {
                            break;
                        }
                        if seen.insert(id) {
                            if let Some(term) = all_terms.iter().find(|t| t.id == id) {
                                selected.push(term.clone());
                            }
                        }
                    }
                }
                None => {
                    warn!("no term index configured; glossary retrieval is lexical only");
                }
            }
        }

        debug!(
            term_count = selected.len(),
            total_terms = all_terms.len(),
            "glossary retrieval complete"
        );
        Ok(selected)
    }
}

/// Case-insensitive whole-word containment
fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let text_lower = text.to_lowercase();
    let word_lower = word.to_lowercase();
    let mut start = 0;
    while let Some(pos) = text_lower[start..].find(&word_lower) {
        let begin = start + pos;
        let end = begin + word_lower.len();
        let boundary_before = begin == 0
            || !text_lower[..begin]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let boundary_after = end == text_lower.len()
            || !text_lower[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if boundary_before && boundary_after {
            return true;
        }
        start = end;
    }
    false
}
