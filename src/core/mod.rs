//! Core compiler logic: schema, validation, merging, dispatch.

pub mod actionfile;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod merger;
pub mod parser;
pub mod payload;
pub mod provenance;
pub mod resolver;
pub mod types;
pub mod validator;
