//! WC-003: Raw document loading.
//!
//! Reads windfiles and actionfiles (YAML, or JSON which YAML accepts) into an
//! untyped `serde_yaml_ng::Value`. Shape checks happen in the validator.

use super::error::CompileError;
use std::path::Path;

/// Read a document from disk.
pub fn parse_document_file(path: &Path) -> Result<serde_yaml_ng::Value, CompileError> {
    let content = std::fs::read_to_string(path).map_err(|e| CompileError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_document_named(&content, &path.display().to_string())
}

/// Parse a document from a string.
pub fn parse_document(text: &str) -> Result<serde_yaml_ng::Value, CompileError> {
    parse_document_named(text, "document")
}

fn parse_document_named(text: &str, origin: &str) -> Result<serde_yaml_ng::Value, CompileError> {
    serde_yaml_ng::from_str(text).map_err(|e| CompileError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })
}
