//! WC-002: Compile error taxonomy.
//!
//! Every stage fails whole. Variants carry the action or field path that
//! caused the failure so the CLI can point at it.

use super::types::Target;
use std::path::PathBuf;
use thiserror::Error;

/// Any failure along Validate → Merge → Generate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    /// Raw document is not valid YAML/JSON
    #[error("cannot parse {origin}: {message}")]
    Parse { origin: String, message: String },

    /// Document could not be read
    #[error("cannot read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// Grammar violation (missing/unknown field, wrong type, bad name)
    #[error("schema error at `{path}`: {message}")]
    Schema { path: String, message: String },

    /// Valid shape, invalid meaning
    #[error("semantic error at `{path}`: {message}")]
    Semantic { path: String, message: String },

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl CompileError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn semantic(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Semantic {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Merge-stage failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("action `{action}` references `{reference}` which cannot be resolved: {reason}")]
    Unresolved {
        action: String,
        reference: String,
        reason: String,
    },

    #[error("action `{action}` has a cyclic reference: {chain}")]
    Cycle { action: String, chain: String },

    #[error("action name `{name}` produced by `{reference}` collides with `{existing}`")]
    NameCollision {
        name: String,
        reference: String,
        existing: String,
    },
}

/// Generation-stage failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("no generator registered for target `{0}`")]
    UnknownTarget(String),

    #[error("windfile does not declare target `{target}` (declared: {declared})")]
    TargetNotDeclared { target: Target, declared: String },

    #[error("action `{action}` has no provenance record")]
    MissingProvenance { action: String },

    #[error("invalid `{field}` for {target}: {message}")]
    InvalidMetadata {
        target: Target,
        field: String,
        message: String,
    },

    #[error("generated unit `{name}` would be defined twice")]
    NameClash { name: String },

    #[error("action `{action}` still references `{reference}`; merge before generating")]
    UnmergedReference { action: String, reference: String },
}

/// Rendered output failed the target runtime's own syntax check.
/// Reported to the caller, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxCheckWarning {
    pub target: Target,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for SyntaxCheckWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} syntax check failed (exit {})",
            self.target, self.exit_code
        )?;
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if !detail.is_empty() {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wc002_schema_display_names_path() {
        let e = CompileError::schema("actions.build", "unknown field `foo`");
        assert_eq!(
            e.to_string(),
            "schema error at `actions.build`: unknown field `foo`"
        );
    }

    #[test]
    fn test_wc002_merge_is_transparent() {
        let e: CompileError = MergeError::Cycle {
            action: "a".into(),
            chain: "x -> y -> x".into(),
        }
        .into();
        assert!(e.to_string().contains("cyclic reference: x -> y -> x"));
    }

    #[test]
    fn test_wc002_generation_unknown_target() {
        let e: CompileError = GenerationError::UnknownTarget("gitlab".into()).into();
        assert_eq!(e.to_string(), "no generator registered for target `gitlab`");
    }

    #[test]
    fn test_wc002_syntax_warning_prefers_stderr() {
        let w = SyntaxCheckWarning {
            target: Target::Cli,
            exit_code: 2,
            stdout: "out".into(),
            stderr: "line 3: syntax error".into(),
        };
        assert_eq!(
            w.to_string(),
            "cli syntax check failed (exit 2): line 3: syntax error"
        );
    }

    #[test]
    fn test_wc002_syntax_warning_falls_back_to_stdout() {
        let w = SyntaxCheckWarning {
            target: Target::Bamboo,
            exit_code: 1,
            stdout: "bad yaml".into(),
            stderr: String::new(),
        };
        assert!(w.to_string().ends_with(": bad yaml"));
    }
}
