//! Monitoring subsystem: liveness detection, persisted state, the cycle
//! lock, and cycle orchestration.
//!
//! The `liveness` module asks the process table whether the target runs.
//! The `status` module keeps the last observed state between invocations.
//! The `lock` module keeps overlapping cycles apart.
//! The `cycle` module ties them together with the notifier: lock → check →
//! notify → persist → unlock.

pub mod cycle;
pub mod liveness;
pub mod lock;
pub mod status;

pub use cycle::{CycleReport, CycleTarget, MonitoringCycle};
pub use liveness::{LivenessChecker, ProcessTable};
pub use lock::{Acquire, CycleLock};
pub use status::StatusStore;
