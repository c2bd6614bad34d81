//! WC-009: Generator dispatch.
//!
//! A backend turns a merged windfile plus its provenance into the artifact
//! one CI system runs. The registry picks the backend for a target and runs
//! the optional syntax check on what it rendered.

use super::error::{GenerationError, SyntaxCheckWarning};
use super::provenance::{Provenance, ProvenanceRecord};
use super::types::{Action, ActionKind, Target, WindFile};
use crate::generators;
use indexmap::IndexMap;

/// Output of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub target: Target,
    pub text: String,
    /// `${...}` names left literal because nothing defined them
    pub unresolved: Vec<String>,
    /// Set when the syntax check ran and rejected `text`
    pub warning: Option<SyntaxCheckWarning>,
}

impl Rendered {
    pub fn new(target: Target, text: String, mut unresolved: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        unresolved.retain(|n| seen.insert(n.clone()));
        Self {
            target,
            text,
            unresolved,
            warning: None,
        }
    }

    /// Content hash of the rendered text. Returns `"blake3:{hex}"`.
    pub fn fingerprint(&self) -> String {
        format!("blake3:{}", blake3::hash(self.text.as_bytes()).to_hex())
    }
}

/// One CI system's code generator.
pub trait Backend {
    fn target(&self) -> Target;

    fn render(&self, windfile: &WindFile, provenance: &Provenance)
        -> Result<Rendered, GenerationError>;

    /// Run the target runtime's own syntax check. `None` means it passed or
    /// the target has no local checker.
    fn check(&self, _text: &str) -> Option<SyntaxCheckWarning> {
        None
    }
}

/// An action selected for rendering, with its provenance.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    pub name: &'a str,
    pub action: &'a Action,
    pub record: &'a ProvenanceRecord,
    /// Platform-only logic (declared or resolved)
    pub platform: bool,
}

/// Actions of `windfile` that apply to `target`, in order.
///
/// Fails when an action has no provenance record or was never merged.
pub fn select_steps<'a>(
    windfile: &'a WindFile,
    provenance: &'a Provenance,
    target: Target,
) -> Result<Vec<Step<'a>>, GenerationError> {
    let mut steps = Vec::with_capacity(windfile.actions.len());
    for (name, action) in &windfile.actions {
        if let ActionKind::External { reference } = &action.kind {
            return Err(GenerationError::UnmergedReference {
                action: name.clone(),
                reference: reference.clone(),
            });
        }
        let record = provenance
            .get(name)
            .ok_or_else(|| GenerationError::MissingProvenance {
                action: name.clone(),
            })?;
        if !action.applies_to(target) {
            tracing::debug!(action = name.as_str(), %target, "skipping action restricted to another platform");
            continue;
        }
        steps.push(Step {
            name,
            action,
            record,
            platform: provenance.is_platform(name),
        });
    }
    Ok(steps)
}

/// Target → backend.
pub struct Registry {
    backends: IndexMap<Target, Box<dyn Backend>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            backends: IndexMap::new(),
        }
    }

    /// Registry with the cli, jenkins and bamboo backends.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(generators::cli::CliBackend));
        registry.register(Box::new(generators::jenkins::JenkinsBackend));
        registry.register(Box::new(generators::bamboo::BambooBackend));
        registry
    }

    /// Add a backend, replacing any previous one for the same target.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.insert(backend.target(), backend);
    }

    pub fn get(&self, target: Target) -> Option<&dyn Backend> {
        self.backends.get(&target).map(|b| b.as_ref())
    }

    pub fn targets(&self) -> Vec<Target> {
        self.backends.keys().copied().collect()
    }

    /// Render `windfile` for `target`, optionally running the syntax check.
    pub fn generate(
        &self,
        target: Target,
        windfile: &WindFile,
        provenance: &Provenance,
        syntax_check: bool,
    ) -> Result<Rendered, GenerationError> {
        if let Some(declared) = &windfile.metadata.targets {
            if !declared.contains(&target) {
                return Err(GenerationError::TargetNotDeclared {
                    target,
                    declared: declared
                        .iter()
                        .map(Target::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }

        let backend = self
            .get(target)
            .ok_or_else(|| GenerationError::UnknownTarget(target.to_string()))?;

        let mut rendered = backend.render(windfile, provenance)?;
        if syntax_check {
            rendered.warning = backend.check(&rendered.text);
            if let Some(w) = &rendered.warning {
                tracing::warn!(%target, exit_code = w.exit_code, "{}", w);
            }
        }

        tracing::info!(
            %target,
            bytes = rendered.text.len(),
            unresolved = rendered.unresolved.len(),
            fingerprint = %rendered.fingerprint(),
            "generation complete"
        );
        Ok(rendered)
    }

    /// Same as [`generate`](Self::generate) for a target given by name.
    pub fn generate_named(
        &self,
        target: &str,
        windfile: &WindFile,
        provenance: &Provenance,
        syntax_check: bool,
    ) -> Result<Rendered, GenerationError> {
        let target: Target = target
            .parse()
            .map_err(|_| GenerationError::UnknownTarget(target.to_string()))?;
        self.generate(target, windfile, provenance, syntax_check)
    }
}
