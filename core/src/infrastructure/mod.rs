//! Host-facing primitives.
//!
//! Provides the `CommandRunner` seam (shell tools, mockable), filesystem
//! probes with an atomic write, and raw process helpers built on `libc`.

pub mod probe;
pub mod process;
pub mod runner;

pub use runner::{shell_quote, CommandRunner, MockRunner, ShellRunner};
