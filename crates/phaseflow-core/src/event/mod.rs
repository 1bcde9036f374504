//! Live fan-out of run events.
//!
//! The event log is the durable record; the `EventBus` hands each appended
//! event to in-process subscribers (the CLI progress view, tests) as it is
//! written.

pub mod bus;

pub use bus::EventBus;
