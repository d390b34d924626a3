use std::fmt;

use serde::{Deserialize, Serialize};

/// Periodic-execution mechanisms, in installer priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    PeriodicServiceManager,
    TableDrivenScheduler,
    UnprivilegedBackgroundLoop,
}

impl StrategyKind {
    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::PeriodicServiceManager => "systemd timer",
            StrategyKind::TableDrivenScheduler => "cron",
            StrategyKind::UnprivilegedBackgroundLoop => "background loop",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What `install` left on the host; persisted as `install.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallRecord {
    pub strategy: StrategyKind,
    /// Files written by the strategy (units, cron descriptor, helper).
    pub artifacts: Vec<String>,
    /// Human-readable location, e.g. `/etc/cron.d` or `user crontab`.
    pub location: String,
    pub installed_at: chrono::DateTime<chrono::Utc>,
}
