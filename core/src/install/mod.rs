//! Scheduling installer.
//!
//! `install` puts the monitoring cycle on a recurring schedule using the
//! first mechanism the host can actually take, in fixed priority order:
//!
//! 1. systemd service + timer (`systemd`)
//! 2. cron: a periodic directory, else the user crontab (`cron`)
//! 3. detached self-looping process (`background`)
//!
//! Each strategy exposes a `probe` (capability predicate plus write-permission
//! check) and an `install` action. The installer stops at the first strategy
//! that both probes and installs successfully. The background loop never
//! fails, so with the default list `install` always ends up somewhere.
//!
//! The host fingerprint (`host`) is detected and reported but does not gate
//! the choice; the probes do.

pub mod background;
pub mod cron;
pub mod host;
pub mod systemd;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ProcwatchError, Result};
use crate::eventlog::EventLog;
use crate::infrastructure::shell_quote;
use crate::types::{InstallRecord, StrategyKind};


/// Everything a strategy needs to know to re-invoke procwatch.
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Absolute path of the procwatch binary schedulers should run.
    pub exe: PathBuf,
    /// Config file to pass along through `PROCWATCH_CONFIG`, if any.
    pub config_file: Option<PathBuf>,
    pub service_name: String,
    pub process_name: String,
    pub interval_secs: u64,
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
    pub stop_helper: PathBuf,
}


impl InstallContext {
    /// Shell command line running `procwatch <subcommand>`, with the config
    /// file exported when one is in use.
    pub fn entry_command(&self, subcommand: &str) -> String {
        let exe = shell_quote(&self.exe.to_string_lossy());
        match &self.config_file {
            Some(cfg) => format!(
                "{}={} {} {}",
                crate::config::CONFIG_ENV,
                shell_quote(&cfg.to_string_lossy()),
                exe,
                subcommand
            ),
            None => format!("{} {}", exe, subcommand),
        }
    }

    /// Environment the scheduled process needs.
    pub fn entry_env(&self) -> Vec<(&'static str, String)> {
        match &self.config_file {
            Some(cfg) => vec![(crate::config::CONFIG_ENV, cfg.to_string_lossy().into_owned())],
            None => Vec::new(),
        }
    }
}


/// Where a strategy installed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installed {
    pub location: String,
    pub artifacts: Vec<PathBuf>,
}


pub trait InstallStrategy {
    fn kind(&self) -> StrategyKind;

    /// Capability predicate and write probe. `Err` explains why the strategy
    /// is unusable on this host.
    fn probe(&self) -> std::result::Result<(), String>;

    fn install(&self) -> std::result::Result<Installed, String>;

    /// Undo a previous `install` described by `record`. Best effort.
    fn uninstall(&self, record: &InstallRecord) -> std::result::Result<(), String>;
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum AttemptResult {
    Unavailable(String),
    Failed(String),
    Installed,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub strategy: StrategyKind,
    pub result: AttemptResult,
}


#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub strategy: StrategyKind,
    pub installed: Installed,
    /// Every strategy tried, in order, including the winner.
    pub attempts: Vec<Attempt>,
}


impl InstallReport {
    pub fn to_record(&self) -> InstallRecord {
        InstallRecord {
            strategy: self.strategy,
            artifacts: self
                .installed
                .artifacts
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            location: self.installed.location.clone(),
            installed_at: chrono::Utc::now(),
        }
    }
}


pub struct SchedulingInstaller<'a> {
    strategies: Vec<Box<dyn InstallStrategy + 'a>>,
}


impl<'a> SchedulingInstaller<'a> {
    pub fn new(strategies: Vec<Box<dyn InstallStrategy + 'a>>) -> Self {
        SchedulingInstaller { strategies }
    }

    /// Try strategies in order; first that probes and installs wins.
    pub fn install(&self, log: &EventLog) -> Result<InstallReport> {
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            let kind = strategy.kind();
            if let Err(reason) = strategy.probe() {
                log.info(&format!("{} unavailable: {}", kind, reason));
                attempts.push(Attempt {
                    strategy: kind,
                    result: AttemptResult::Unavailable(reason),
                });
                continue;
            }

            match strategy.install() {
                Ok(installed) => {
                    log.info(&format!("installed via {} at {}", kind, installed.location));
                    attempts.push(Attempt {
                        strategy: kind,
                        result: AttemptResult::Installed,
                    });
                    return Ok(InstallReport {
                        strategy: kind,
                        installed,
                        attempts,
                    });
                }
                Err(reason) => {
                    log.warn(&format!("{} install failed: {}", kind, reason));
                    attempts.push(Attempt {
                        strategy: kind,
                        result: AttemptResult::Failed(reason),
                    });
                }
            }
        }

        log.error("no scheduling strategy could be installed");
        Err(ProcwatchError::NoStrategy)
    }

    /// Undo the install described by `record` with the matching strategy.
    pub fn uninstall(&self, record: &InstallRecord, log: &EventLog) -> Result<()> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.kind() == record.strategy)
            .ok_or_else(|| {
                ProcwatchError::Command(format!("no handler for strategy {}", record.strategy))
            })?;
        match strategy.uninstall(record) {
            Ok(()) => {
                log.info(&format!("removed {} schedule at {}", record.strategy, record.location));
                Ok(())
            }
            Err(reason) => {
                log.warn(&format!("{} uninstall incomplete: {}", record.strategy, reason));
                Err(ProcwatchError::Command(reason))
            }
        }
    }
}


/// Remove a file, ignoring "already gone".
pub(crate) fn remove_artifact(path: &Path) -> std::result::Result<(), String> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("cannot remove {}: {}", path.display(), e)),
    }
}
