//! Configuration: one explicit structure, loaded once, passed to every
//! component.
//!
//! Sources, lowest to highest precedence: built-in defaults, the YAML config
//! file (`/etc/procwatch/config.yaml` unless overridden), then `PROCWATCH_*`
//! environment variables. A missing config file is not an error.
//!
//! Location fallbacks (state directory, log file) are resolved exactly once by
//! `Paths::resolve`; nothing downstream re-probes them. `Paths::locate` makes
//! the same choice for report-only commands without creating anything.
//!
//! Scheduled runs never see the installer's environment, so `install` saves
//! the effective configuration (`Config::for_schedule`) next to the state
//! files and points the schedule at it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProcwatchError, Result};
use crate::infrastructure::probe;


/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/procwatch/config.yaml";

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "PROCWATCH_CONFIG";


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Name of the process whose liveness is monitored.
    pub process_name: String,
    /// Endpoint notified while the process is running.
    pub notify_url: String,
    /// Bound on connect and total time of the notification request.
    pub timeout_secs: u64,
    /// How often schedulers re-run the cycle.
    pub interval_secs: u64,
    /// A lock younger than this blocks a new cycle. Must be below
    /// `interval_secs`.
    pub lock_stale_secs: u64,
    /// Preferred directory for status, lock and install records.
    pub state_dir: PathBuf,
    /// Used when `state_dir` is not writable. `None` picks
    /// `$HOME/.local/state/procwatch`, or `/tmp/procwatch` without a HOME.
    pub fallback_state_dir: Option<PathBuf>,
    /// Preferred event log file.
    pub log_file: PathBuf,
    /// Base name for units, cron files and crontab markers.
    pub service_name: String,
    /// Persist DEBUG entries to the event log.
    pub debug: bool,

    /// File this configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}


impl Default for Config {
    fn default() -> Self {
        Config {
            process_name: String::new(),
            notify_url: "http://localhost:8080/status".into(),
            timeout_secs: 10,
            interval_secs: 60,
            lock_stale_secs: 50,
            state_dir: PathBuf::from("/var/lib/procwatch"),
            fallback_state_dir: None,
            log_file: PathBuf::from("/var/log/procwatch.log"),
            service_name: "procwatch".into(),
            debug: false,
            source: None,
        }
    }
}


impl Config {
    /// Load from `explicit`, else `$PROCWATCH_CONFIG`, else the default path;
    /// apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = explicit
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Config::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ProcwatchError::io(path, e))?;
        let mut config = Config::parse(&content).map_err(|source| ProcwatchError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse YAML text; unknown keys are ignored, missing keys default.
    pub fn parse(content: &str) -> std::result::Result<Config, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
    }

    /// Apply `PROCWATCH_*` overrides through `lookup` (the process
    /// environment in production, a map in tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROCWATCH_PROCESS") {
            self.process_name = v;
        }
        if let Some(v) = lookup("PROCWATCH_URL") {
            self.notify_url = v;
        }
        if let Some(v) = lookup("PROCWATCH_TIMEOUT") {
            self.timeout_secs = v.trim().parse().map_err(|_| {
                ProcwatchError::Config(format!("PROCWATCH_TIMEOUT is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("PROCWATCH_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROCWATCH_LOG_FILE") {
            self.log_file = PathBuf::from(v);
        }
        Ok(())
    }

    /// Reject configurations the cycle cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.process_name.trim().is_empty() {
            return Err(ProcwatchError::Config(
                "process_name must be set (config file or PROCWATCH_PROCESS)".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ProcwatchError::Config("timeout_secs must be positive".into()));
        }
        if self.lock_stale_secs >= self.interval_secs {
            return Err(ProcwatchError::Config(format!(
                "lock_stale_secs ({}) must be less than interval_secs ({})",
                self.lock_stale_secs, self.interval_secs
            )));
        }
        if self.service_name.is_empty()
            || !self
                .service_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProcwatchError::Config(format!(
                "service_name must be non-empty [A-Za-z0-9_-]: '{}'",
                self.service_name
            )));
        }
        Ok(())
    }

    /// The configuration a scheduled run should load: this one, with
    /// environment overrides already folded in and the locations pinned to
    /// what `paths` resolved to.
    pub fn for_schedule(&self, paths: &Paths) -> Config {
        Config {
            state_dir: paths.state_dir.clone(),
            log_file: paths.log_file.clone(),
            source: None,
            ..self.clone()
        }
    }

    /// Write `self` as YAML to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).map_err(|e| {
            ProcwatchError::Config(format!("cannot encode configuration: {}", e))
        })?;
        probe::atomic_write(path, yaml.as_bytes()).map_err(|e| ProcwatchError::io(path, e))
    }

    fn fallback_dir(&self) -> PathBuf {
        if let Some(dir) = &self.fallback_state_dir {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home)
                .join(".local")
                .join("state")
                .join(&self.service_name),
            None => std::env::temp_dir().join(&self.service_name),
        }
    }
}


/// Concrete on-disk locations, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
    pub status_file: PathBuf,
    pub lock_file: PathBuf,
    pub pid_file: PathBuf,
    pub install_record: PathBuf,
    pub stop_helper: PathBuf,
    /// Configuration snapshot that scheduled runs load.
    pub scheduled_config: PathBuf,
    /// True if either location had to fall back.
    pub fell_back: bool,
}


impl Paths {
    /// Pick the state directory (preferred, then fallback) and the log file
    /// (preferred, then `<state_dir>/<service>.log`).
    pub fn resolve(config: &Config) -> Result<Paths> {
        let mut fell_back = false;

        let state_dir = if probe::ensure_writable_dir(&config.state_dir) {
            config.state_dir.clone()
        } else {
            let alt = config.fallback_dir();
            if !probe::ensure_writable_dir(&alt) {
                return Err(ProcwatchError::Config(format!(
                    "neither {} nor {} is writable",
                    config.state_dir.display(),
                    alt.display()
                )));
            }
            tracing::debug!(
                preferred = %config.state_dir.display(),
                fallback = %alt.display(),
                "state directory not writable, falling back"
            );
            fell_back = true;
            alt
        };

        let log_ok = config
            .log_file
            .parent()
            .map(probe::ensure_writable_dir)
            .unwrap_or(false);
        let log_file = if log_ok && log_file_appendable(&config.log_file) {
            config.log_file.clone()
        } else {
            fell_back = true;
            state_dir.join(format!("{}.log", config.service_name))
        };

        Ok(Paths::in_dir(state_dir, log_file, fell_back))
    }

    /// Find the locations a previous `resolve` settled on without creating
    /// directories or probe files. The first of preferred and fallback state
    /// directory holding a status or install record wins, then the first that
    /// exists, then the preferred one.
    pub fn locate(config: &Config) -> Paths {
        let candidates = [config.state_dir.clone(), config.fallback_dir()];
        let has_records = |dir: &Path| {
            dir.join("status").exists() || dir.join("install.yaml").exists()
        };
        let state_dir = candidates
            .iter()
            .find(|d| has_records(d.as_path()))
            .or_else(|| candidates.iter().find(|d| d.is_dir()))
            .unwrap_or(&candidates[0])
            .clone();
        let mut fell_back = state_dir != config.state_dir;

        let local_log = state_dir.join(format!("{}.log", config.service_name));
        let log_file = if !config.log_file.exists() && local_log.exists() {
            fell_back = true;
            local_log
        } else {
            config.log_file.clone()
        };

        Paths::in_dir(state_dir, log_file, fell_back)
    }

    /// Lay out all state files inside `state_dir`.
    pub fn in_dir(state_dir: PathBuf, log_file: PathBuf, fell_back: bool) -> Paths {
        Paths {
            status_file: state_dir.join("status"),
            lock_file: state_dir.join("cycle.lock"),
            pid_file: state_dir.join("loop.pid"),
            install_record: state_dir.join("install.yaml"),
            stop_helper: state_dir.join("procwatch-stop.sh"),
            scheduled_config: state_dir.join("config.yaml"),
            state_dir,
            log_file,
            fell_back,
        }
    }
}


/// An existing log file may be owned by someone else even in a writable dir.
fn log_file_appendable(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    std::fs::OpenOptions::new().append(true).open(path).is_ok()
}
