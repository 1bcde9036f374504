//! Shared domain types for phaseflow.
//!
//! Workflow definitions, compiled execution plans, run state, the audit
//! event stream, budget ledgers, and decision records. Every type here is
//! plain data that serializes to the plan/state/event documents persisted
//! per run.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod budget;
pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod plan;
pub mod run;
pub mod step;
pub mod workflow;
