//! windc: a compiler for windfile CI pipelines.
//!
//! One declarative pipeline, validated and merged with shared actionfiles,
//! rendered as a local bash script, a Jenkinsfile or Bamboo YAML specs.

pub mod cli;
pub mod core;
pub mod generators;
pub mod transport;
