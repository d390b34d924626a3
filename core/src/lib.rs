//! procwatch core: a scheduler-driven process liveness monitor.
//!
//! Each invocation of the monitoring cycle checks whether a named process is
//! running, notes Stopped → Running transitions, pings a status endpoint
//! while the process is up, and persists the observed state for the next
//! cycle. The installer puts that cycle on a recurring schedule using the
//! best mechanism the host offers.
//!
//! `sys::Sys` is the entry point: it owns the configuration and dispatches
//! `command::Command` values.

pub mod command;
pub mod config;
pub mod error;
pub mod eventlog;
pub mod infrastructure;
pub mod install;
pub mod monitor;
pub mod notify;
pub mod sys;
pub mod types;
