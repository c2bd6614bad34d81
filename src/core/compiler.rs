//! WC-010: Compile driver: Validate → Merge → Generate.

use super::actionfile::ActionSource;
use super::codegen::{Registry, Rendered};
use super::error::CompileError;
use super::merger::merge;
use super::provenance::Provenance;
use super::types::{Target, WindFile};
use super::validator::validate;

/// Knobs shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Targets this build accepts in `metadata.targets`
    pub supported_targets: Vec<Target>,
    /// Run the backend's syntax check on rendered output
    pub syntax_check: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            supported_targets: Target::ALL.to_vec(),
            syntax_check: false,
        }
    }
}

/// Everything one compile produced.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub merged: WindFile,
    pub provenance: Provenance,
    pub rendered: Rendered,
}

/// Validate → Merge → Generate with a fixed option set and registry.
pub struct Compiler {
    pub options: CompileOptions,
    pub registry: Registry,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            registry: Registry::builtin(),
        }
    }

    /// Validate and merge only.
    pub fn merge(
        &self,
        raw: &serde_yaml_ng::Value,
        source: &dyn ActionSource,
    ) -> Result<(WindFile, Provenance), CompileError> {
        let windfile = validate(raw, &self.options)?;
        let mut provenance = Provenance::new();
        let merged = merge(&windfile, source, &mut provenance)?;
        Ok((merged, provenance))
    }

    /// Run the full pipeline for `target`.
    pub fn compile(
        &self,
        raw: &serde_yaml_ng::Value,
        target: Target,
        source: &dyn ActionSource,
    ) -> Result<Compilation, CompileError> {
        let (merged, provenance) = self.merge(raw, source)?;
        let rendered =
            self.registry
                .generate(target, &merged, &provenance, self.options.syntax_check)?;
        Ok(Compilation {
            merged,
            provenance,
            rendered,
        })
    }
}
