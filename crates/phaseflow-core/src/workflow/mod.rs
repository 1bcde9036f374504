//! Workflow definitions: registry, inheritance resolution, and plan compilation.
//!
//! - `registry` -- named definitions, including the built-in `standard` workflow
//! - `resolver` -- merges an inheritance chain into one `ResolvedWorkflow`
//! - `compiler` -- binds a resolved workflow to a work reference as an `ExecutionPlan`

pub mod compiler;
pub mod registry;
pub mod resolver;
