//! Monitoring cycle: one liveness check from lock to unlock.
//!
//! `MonitoringCycle::run` walks Idle → Locked → Checked → Notified → Done:
//! 1. Acquire the cycle lock. A fresh lock held by someone else aborts the
//!    cycle before anything is checked or written.
//! 2. Check the process, read the previous state, log the outcome and any
//!    Stopped → Running restart.
//! 3. Notify iff the process is running. A failed notification is a warning.
//! 4. Persist the current state and release the lock, whatever happened in 3.
//!
//! Nothing in here is fatal: every failure becomes a log line and the cycle
//! still reaches Done.

use serde::Serialize;

use crate::eventlog::EventLog;
use crate::monitor::liveness::LivenessChecker;
use crate::monitor::lock::{Acquire, CycleLock};
use crate::monitor::status::StatusStore;
use crate::notify::{NotificationClient, NotifyOutcome, Payload};
use crate::types::LivenessState;


/// What one cycle watches and where it reports.
#[derive(Debug, Clone)]
pub struct CycleTarget {
    pub process_name: String,
    pub notify_url: String,
    pub timeout_secs: u64,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleReport {
    /// Another cycle holds a fresh lock; nothing was checked or written.
    Skipped { lock_age_secs: u64 },
    Completed {
        previous: LivenessState,
        current: LivenessState,
        restarted: bool,
        /// `None` when the process is stopped.
        notification: Option<NotifyOutcome>,
        status_written: bool,
    },
}


pub struct MonitoringCycle<'a> {
    target: &'a CycleTarget,
    lock: &'a CycleLock,
    store: &'a StatusStore,
    checker: &'a dyn LivenessChecker,
    notifier: &'a NotificationClient<'a>,
    log: &'a EventLog,
}


impl<'a> MonitoringCycle<'a> {
    pub fn new(
        target: &'a CycleTarget,
        lock: &'a CycleLock,
        store: &'a StatusStore,
        checker: &'a dyn LivenessChecker,
        notifier: &'a NotificationClient<'a>,
        log: &'a EventLog,
    ) -> Self {
        MonitoringCycle {
            target,
            lock,
            store,
            checker,
            notifier,
            log,
        }
    }

    pub fn run(&self) -> CycleReport {
        let name = &self.target.process_name;

        // Idle → Locked
        let guard = match self.lock.acquire() {
            Ok(Acquire::Acquired(guard)) => {
                if guard.replaced_stale {
                    self.log.warn("replaced stale lock left by an earlier cycle");
                }
                Some(guard)
            }
            Ok(Acquire::Busy { age }) => {
                self.log.warn(&format!(
                    "another instance is running (lock age {}s), skipping this cycle",
                    age.as_secs()
                ));
                return CycleReport::Skipped {
                    lock_age_secs: age.as_secs(),
                };
            }
            Err(e) => {
                // Without a lock directory there is nobody to exclude; run
                // unguarded rather than stop monitoring.
                self.log.warn(&format!(
                    "cannot create lock {}: {}; continuing without it",
                    self.lock.path().display(),
                    e
                ));
                None
            }
        };

        // Locked → Checked
        let current = LivenessState::from_check(self.checker.is_running(name));
        let previous = self.store.read();
        self.log.debug(&format!(
            "check {}: previous={} current={}",
            name, previous, current
        ));
        match current {
            LivenessState::Running => self.log.info(&format!("{} is running", name)),
            _ => self.log.info(&format!("{} is not running", name)),
        }
        let restarted = LivenessState::is_restart(previous, current);
        if restarted {
            self.log.info(&format!("process {} was restarted", name));
        }

        // Checked → Notified
        let notification = if current == LivenessState::Running {
            let payload = Payload::new(name, current.as_str());
            let outcome = self.notifier.notify(
                &self.target.notify_url,
                self.target.timeout_secs,
                &payload,
            );
            self.log_notification(&outcome);
            Some(outcome)
        } else {
            self.log
                .info(&format!("notification skipped: {} is stopped", name));
            None
        };

        // → Done
        let status_written = match self.store.write(current) {
            Ok(()) => true,
            Err(e) => {
                self.log.warn(&format!("cannot persist status: {}", e));
                false
            }
        };
        if let Some(guard) = guard {
            if let Err(e) = guard.release() {
                self.log.warn(&format!("cannot remove lock: {}", e));
            }
        }

        CycleReport::Completed {
            previous,
            current,
            restarted,
            notification,
            status_written,
        }
    }

    fn log_notification(&self, outcome: &NotifyOutcome) {
        let url = &self.target.notify_url;
        if !outcome.success {
            self.log.warn(&format!(
                "notification to {} via {} failed: {}",
                url, outcome.transport, outcome.detail
            ));
        } else if outcome.transport == crate::notify::TransportKind::Simulated {
            self.log.info(&format!(
                "notification to {} simulated: {}",
                url, outcome.detail
            ));
        } else {
            self.log.info(&format!(
                "notification to {} sent via {} ({})",
                url, outcome.transport, outcome.detail
            ));
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
