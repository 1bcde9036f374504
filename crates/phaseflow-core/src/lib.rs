//! Engine logic and store trait definitions for phaseflow.
//!
//! This crate defines the "ports" (checkpoint store, event log, plan store,
//! step executor, decision channel, branch probe) that the infrastructure
//! layer implements, plus everything that is pure orchestration logic:
//! definition resolution, plan compilation, guards, budget tracking, and
//! the execution engine itself. It depends only on `phaseflow-types` --
//! never on `phaseflow-infra` or any database/IO crate.

pub mod budget;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod guard;
pub mod probe;
pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
