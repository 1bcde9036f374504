//! Step executor adapters.

pub mod command;

pub use command::CommandStepExecutor;
