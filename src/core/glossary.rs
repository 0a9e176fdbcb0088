//! Immutable glossary store with approved target-language renderings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::core::errors::{Result, RouterError};
use crate::core::models::Language;

/// One approved terminology mapping, as stored in the glossary file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub source_term: String,
    pub target_language: Language,
    pub target_term: String,
}

/// A terminology mapping that must appear verbatim in a backend's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermConstraint {
    pub source_term: String,
    pub target_term: String,
}

/// Read-only term table, loaded once per session and replaced wholesale
/// on reload. Lookups are pure and need no locking.
#[derive(Debug, Clone)]
pub struct GlossaryStore {
    version: u32,
    entries: HashMap<(String, Language), String>,
}

impl GlossaryStore {
    /// Empty store, version 0. Useful when no glossary is configured.
    pub fn empty() -> Self {
        Self {
            version: 0,
            entries: HashMap::new(),
        }
    }

    /// Build from in-memory entries. Duplicate (term, language) pairs
    /// resolve last-write-wins, matching reload semantics.
    pub fn from_entries(version: u32, entries: Vec<GlossaryEntry>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.source_term.trim().is_empty() || entry.target_term.trim().is_empty() {
                return Err(RouterError::GlossaryParse {
                    message: format!(
                        "empty term in entry for {}: {:?} -> {:?}",
                        entry.target_language, entry.source_term, entry.target_term
                    ),
                });
            }
            map.insert(
                (entry.source_term, entry.target_language),
                entry.target_term,
            );
        }
        Ok(Self {
            version,
            entries: map,
        })
    }

    /// Load a glossary file (JSON array of entries). The load is atomic:
    /// any malformed row rejects the whole file, nothing is applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P, version: u32) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RouterError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let entries: Vec<GlossaryEntry> =
            serde_json::from_str(&content).map_err(|e| RouterError::GlossaryParse {
                message: format!("{}: {}", path.display(), e),
            })?;

        let store = Self::from_entries(version, entries)?;
        info!(
            "Loaded glossary v{}: {} terms from {}",
            version,
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Approved rendering for a term, if one exists
    pub fn lookup(&self, term: &str, target: Language) -> Option<&str> {
        self.entries
            .get(&(term.to_string(), target))
            .map(|s| s.as_str())
    }

    /// All constraints applicable to a piece of source text: every entry
    /// for the target language whose source term occurs in the text.
    pub fn constraints_for(&self, text: &str, target: Language) -> Vec<TermConstraint> {
        let mut constraints: Vec<TermConstraint> = self
            .entries
            .iter()
            .filter(|((term, lang), _)| *lang == target && text.contains(term.as_str()))
            .map(|((term, _), rendering)| TermConstraint {
                source_term: term.clone(),
                target_term: rendering.clone(),
            })
            .collect();
        // Stable prompt ordering regardless of map iteration order
        constraints.sort_by(|a, b| a.source_term.cmp(&b.source_term));
        constraints
    }

    /// Number of terms mapped for one target language
    pub fn entries_for(&self, target: Language) -> usize {
        self.entries.keys().filter(|(_, lang)| *lang == target).count()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
