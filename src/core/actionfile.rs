//! WC-007: Actionfiles and the sources `use` references resolve through.
//!
//! An actionfile is a reusable bundle of steps. A windfile action declaring
//! `use: <id>` is replaced at merge time by the steps of the actionfile the
//! configured `ActionSource` returns for `<id>`.

use super::compiler::CompileOptions;
use super::parser::parse_document_file;
use super::types::{Action, Author, Environment, Target};
use super::validator::validate_actionfile;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// A reusable action definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionFile {
    pub api: String,
    pub metadata: ActionMetadata,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub environment: Environment,
    /// Steps in execution order; a step may itself be an external reference
    pub steps: IndexMap<String, Action>,
}

/// Actionfile metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionMetadata {
    pub name: String,
    pub description: String,
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<Target>>,
}

/// Resolves a `use` identifier to a validated actionfile.
pub trait ActionSource {
    fn fetch(&self, reference: &str) -> Result<ActionFile, String>;
}

/// Actionfiles stored on disk under one root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    options: CompileOptions,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate paths for a reference: as written, with `.yaml`/`.yml`,
    /// then `action.yaml` inside a directory of that name.
    fn candidates(&self, reference: &str) -> [PathBuf; 4] {
        let base = self.root.join(reference);
        [
            base.clone(),
            self.root.join(format!("{}.yaml", reference)),
            self.root.join(format!("{}.yml", reference)),
            base.join("action.yaml"),
        ]
    }
}

impl ActionSource for DirectorySource {
    fn fetch(&self, reference: &str) -> Result<ActionFile, String> {
        let rel = Path::new(reference);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(format!("reference '{}' escapes {}", reference, self.root.display()));
        }

        let path = self
            .candidates(reference)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| format!("no actionfile found under {}", self.root.display()))?;

        tracing::debug!(reference, path = %path.display(), "loading actionfile");
        let raw = parse_document_file(&path).map_err(|e| e.to_string())?;
        validate_actionfile(&raw, &self.options)
            .map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// Pre-validated actionfiles keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: IndexMap<String, ActionFile>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, file: ActionFile) {
        self.files.insert(reference.into(), file);
    }

    pub fn with(mut self, reference: impl Into<String>, file: ActionFile) -> Self {
        self.insert(reference, file);
        self
    }
}

impl ActionSource for MemorySource {
    fn fetch(&self, reference: &str) -> Result<ActionFile, String> {
        self.files
            .get(reference)
            .cloned()
            .ok_or_else(|| "no such actionfile".to_string())
    }
}

/// Source used when a windfile has no external references to resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

impl ActionSource for NoSource {
    fn fetch(&self, _reference: &str) -> Result<ActionFile, String> {
        Err("no actions directory configured".to_string())
    }
}
