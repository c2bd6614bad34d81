//! WC-005: Provenance side-table.
//!
//! Merging flattens external references into concrete actions and renames
//! them. The merger records, per final action name, what the action was
//! before flattening; generators consult it to decide what to render.
//! One `Provenance` lives for exactly one compile.

use super::types::ActionKindTag;
use indexmap::IndexMap;

/// Pre-merge identity of one flattened action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    /// Name as declared in the windfile (the reference name for spliced steps)
    pub original_name: String,
    /// Kind as declared in the windfile (`External` for spliced steps)
    pub original_kind: ActionKindTag,
    /// Concrete kind of the definition that produced the action
    pub resolved_kind: ActionKindTag,
    /// `use` identifiers followed to reach the definition, outermost first
    pub chain: Vec<String>,
}

impl ProvenanceRecord {
    /// Record for an action that was concrete in the windfile.
    pub fn direct(name: &str, kind: ActionKindTag) -> Self {
        Self {
            original_name: name.to_string(),
            original_kind: kind,
            resolved_kind: kind,
            chain: Vec::new(),
        }
    }
}

/// Final action name → record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    records: IndexMap<String, ProvenanceRecord>,
}

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, final_name: impl Into<String>, record: ProvenanceRecord) {
        self.records.insert(final_name.into(), record);
    }

    pub fn get(&self, final_name: &str) -> Option<&ProvenanceRecord> {
        self.records.get(final_name)
    }

    pub fn original_name_of(&self, final_name: &str) -> Option<&str> {
        self.get(final_name).map(|r| r.original_name.as_str())
    }

    /// Was this action an external reference in the windfile?
    pub fn was_external(&self, final_name: &str) -> bool {
        self.get(final_name)
            .is_some_and(|r| r.original_kind == ActionKindTag::External)
    }

    /// Is this action platform-only logic?
    pub fn is_platform(&self, final_name: &str) -> bool {
        self.get(final_name).is_some_and(|r| {
            r.original_kind == ActionKindTag::Platform || r.resolved_kind == ActionKindTag::Platform
        })
    }

    /// Human readable origin, e.g. `lint (external via actions/lint)`.
    pub fn describe(&self, final_name: &str) -> Option<String> {
        self.get(final_name).map(|r| {
            if r.chain.is_empty() {
                format!("{} ({})", r.original_name, r.original_kind)
            } else {
                format!(
                    "{} ({} via {})",
                    r.original_name,
                    r.original_kind,
                    r.chain.join(" -> ")
                )
            }
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
