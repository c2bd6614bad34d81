//! Backends: render merged windfiles for each CI system.
//!
//! Each backend implements [`Backend`](crate::core::codegen::Backend):
//! 1. `cli` emits a bash script run locally or in a worker container
//! 2. `jenkins` emits a declarative Jenkinsfile
//! 3. `bamboo` emits Bamboo YAML specs

pub mod bamboo;
pub mod cli;
pub mod jenkins;
pub mod shell;
