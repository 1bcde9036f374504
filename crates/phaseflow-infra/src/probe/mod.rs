//! Branch probes.

pub mod git;

pub use git::GitBranchProbe;
