//! Infrastructure layer for phaseflow.
//!
//! Contains implementations of the ports defined in `phaseflow-core`:
//! three interchangeable run stores (one directory per run, SQLite, and an
//! in-process map), the command-backed step executor, the git branch probe,
//! plus configuration loading and workflow definition discovery.

pub mod config;
pub mod executor;
pub mod file;
pub mod memory;
pub mod probe;
pub mod sqlite;
pub mod workflow_loader;

#[cfg(test)]
pub(crate) mod testing;
