//! Store trait definitions (ports).
//!
//! These traits define the persistence interface that the infrastructure
//! layer (phaseflow-infra) implements with file, SQLite, and in-memory
//! backends. The core crate never depends on any specific storage
//! technology. All three must be safe to share between processes, not just
//! threads.

pub mod checkpoint;
pub mod event_log;
pub mod plan;
