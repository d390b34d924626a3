use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::command::{Command, Response};
use crate::config::{Config, Paths};
use crate::error::{ProcwatchError, Result};
use crate::eventlog::EventLog;
use crate::infrastructure::probe::{atomic_write, dir_writable};
use crate::infrastructure::process::{is_pid_alive, is_root};
use crate::infrastructure::CommandRunner;
use crate::install::background::{
    default_user_unit_dir, stop_loop, BackgroundLoopStrategy, LoopLauncher, StopOutcome,
    STOP_GRACE,
};
use crate::install::cron::{CronStrategy, CRON_DIRS};
use crate::install::host::HostProbe;
use crate::install::systemd::{SystemdTimerStrategy, SYSTEM_UNIT_DIR};
use crate::install::{Attempt, AttemptResult, InstallContext, SchedulingInstaller};
use crate::monitor::{
    CycleLock, CycleReport, CycleTarget, LivenessChecker, MonitoringCycle, ProcessTable,
    StatusStore,
};
use crate::notify::{NotificationClient, TransportKind};
use crate::types::{InstallRecord, LivenessState};


/// Host tools the diagnostics report on.
const DIAGNOSED_TOOLS: [&str; 6] = ["pgrep", "ps", "curl", "wget", "systemctl", "crontab"];


/// Where the installer looks for scheduler directories. The defaults are
/// the real system locations; tests point them into a temp dir.
#[derive(Debug, Clone)]
pub struct InstallTargets {
    pub unit_dir: PathBuf,
    pub cron_dirs: Vec<PathBuf>,
    pub user_unit_dir: Option<PathBuf>,
    /// Root of the filesystem the host fingerprint is read from.
    pub host_root: PathBuf,
}

impl Default for InstallTargets {
    fn default() -> Self {
        InstallTargets {
            unit_dir: PathBuf::from(SYSTEM_UNIT_DIR),
            cron_dirs: CRON_DIRS.iter().map(PathBuf::from).collect(),
            user_unit_dir: default_user_unit_dir(),
            host_root: PathBuf::from("/"),
        }
    }
}


/// Central runtime for procwatch. Owns the configuration and the resolved
/// paths, borrows the host seams, and dispatches commands.
///
/// Paths are resolved once at construction; every handler uses the same
/// `Paths`. `new` may create the state and log directories, `read_only`
/// never writes anything.
pub struct Sys<'a> {
    config: Config,
    paths: Paths,
    log: EventLog,
    runner: &'a dyn CommandRunner,
    launcher: &'a dyn LoopLauncher,
    exe: PathBuf,
    targets: InstallTargets,
}


#[derive(Debug, Serialize)]
struct StatusReport {
    process: String,
    recorded: LivenessState,
    live: LivenessState,
    lock_age_secs: Option<u64>,
    installed: Option<InstallRecord>,
    loop_pid: Option<u32>,
    state_dir: PathBuf,
    log_file: PathBuf,
    recent: Vec<String>,
}


impl<'a> Sys<'a> {
    pub fn new(
        config: Config,
        runner: &'a dyn CommandRunner,
        launcher: &'a dyn LoopLauncher,
    ) -> Result<Sys<'a>> {
        config.validate()?;
        let paths = Paths::resolve(&config)?;
        if paths.fell_back {
            tracing::info!(
                state_dir = %paths.state_dir.display(),
                log_file = %paths.log_file.display(),
                "using fallback locations"
            );
        }
        Sys::assemble(config, paths, runner, launcher)
    }

    /// For commands that only report (`Command::is_read_only`): locations
    /// are looked up, never created.
    pub fn read_only(
        config: Config,
        runner: &'a dyn CommandRunner,
        launcher: &'a dyn LoopLauncher,
    ) -> Result<Sys<'a>> {
        config.validate()?;
        let paths = Paths::locate(&config);
        Sys::assemble(config, paths, runner, launcher)
    }

    fn assemble(
        config: Config,
        paths: Paths,
        runner: &'a dyn CommandRunner,
        launcher: &'a dyn LoopLauncher,
    ) -> Result<Sys<'a>> {
        let log = EventLog::new(&paths.log_file, config.debug);
        let exe = std::env::current_exe()
            .map_err(|e| ProcwatchError::io(Path::new("/proc/self/exe"), e))?;
        Ok(Sys {
            config,
            paths,
            log,
            runner,
            launcher,
            exe,
            targets: InstallTargets::default(),
        })
    }

    /// Binary that schedulers re-invoke.
    pub fn with_exe(mut self, exe: &Path) -> Self {
        self.exe = exe.to_path_buf();
        self
    }

    pub fn with_targets(mut self, targets: InstallTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Dispatch one command.
    pub fn execute(&self, cmd: Command) -> Response {
        tracing::debug!(command = cmd.name(), "execute");
        match cmd {
            Command::Install => self.cmd_install(),
            Command::Run => self.cmd_run(),
            Command::Test => self.cmd_test(),
            Command::Status { json } => self.cmd_status(json),
            Command::Stop => self.cmd_stop(),
            Command::Uninstall => self.cmd_uninstall(),
            Command::Loop { iterations } => self.cmd_loop(iterations),
        }
    }

    /// Record a command line the dispatcher could not make sense of.
    pub fn reject(&self, input: &str) -> Response {
        let message = ProcwatchError::UnknownCommand(input.to_string()).to_string();
        self.log.error(&message);
        Response::error(message)
    }

    // -----------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------

    /// One monitoring cycle against the live host.
    pub fn run_cycle(&self) -> CycleReport {
        let target = CycleTarget {
            process_name: self.config.process_name.clone(),
            notify_url: self.config.notify_url.clone(),
            timeout_secs: self.config.timeout_secs,
        };
        let lock = CycleLock::new(
            &self.paths.lock_file,
            Duration::from_secs(self.config.lock_stale_secs),
        );
        let store = StatusStore::new(&self.paths.status_file);
        let table = ProcessTable::new(self.runner);
        let notifier = NotificationClient::with_host_tools(self.runner);
        MonitoringCycle::new(&target, &lock, &store, &table, &notifier, &self.log).run()
    }

    fn cmd_run(&self) -> Response {
        Response::ok(self.summarize(&self.run_cycle()))
    }

    fn cmd_loop(&self, iterations: Option<u64>) -> Response {
        let interval = Duration::from_secs(self.config.interval_secs);
        self.log.info(&format!(
            "background loop started (pid {}), every {}s",
            std::process::id(),
            self.config.interval_secs
        ));
        let mut cycles: u64 = 0;
        loop {
            let report = self.run_cycle();
            tracing::debug!(summary = %self.summarize(&report), "loop cycle");
            cycles += 1;
            if iterations.is_some_and(|max| cycles >= max) {
                break;
            }
            std::thread::sleep(interval);
        }
        Response::ok(format!("{} cycles", cycles))
    }

    fn summarize(&self, report: &CycleReport) -> String {
        match report {
            CycleReport::Skipped { lock_age_secs } => format!(
                "skipped: another cycle holds the lock ({}s old)",
                lock_age_secs
            ),
            CycleReport::Completed {
                previous,
                current,
                restarted,
                notification,
                status_written,
            } => {
                let mut out = format!(
                    "{}: {} (previously {})",
                    self.config.process_name, current, previous
                );
                if *restarted {
                    out.push_str(", restarted");
                }
                match notification {
                    Some(n) if n.success => {
                        out.push_str(&format!("; notified via {}", n.transport))
                    }
                    Some(n) => out.push_str(&format!(
                        "; notification via {} failed: {}",
                        n.transport, n.detail
                    )),
                    None => out.push_str("; no notification"),
                }
                if !status_written {
                    out.push_str("; status not saved");
                }
                out
            }
        }
    }

    // -----------------------------------------------------------------
    // Diagnostics and status
    // -----------------------------------------------------------------

    fn cmd_test(&self) -> Response {
        let host = HostProbe::at(&self.targets.host_root).fingerprint();
        let tools: Vec<String> = DIAGNOSED_TOOLS
            .iter()
            .map(|tool| {
                let mark = if self.runner.has_program(tool) { "yes" } else { "no" };
                format!("{} {}", tool, mark)
            })
            .collect();
        let transport = NotificationClient::with_host_tools(self.runner).selected();
        let live = LivenessState::from_check(
            ProcessTable::new(self.runner).is_running(&self.config.process_name),
        );

        let mut lines = vec!["procwatch diagnostics".to_string()];
        lines.push(format!("  config:      {}", self.config_origin()));
        lines.push(format!("  process:     {}", self.config.process_name));
        lines.push(format!("  notify url:  {}", self.config.notify_url));
        lines.push(format!(
            "  privileges:  {}",
            if is_root() { "root" } else { "unprivileged" }
        ));
        lines.push(format!("  host:        {}", host));
        lines.push(format!(
            "  state dir:   {}{}{}",
            self.paths.state_dir.display(),
            if self.paths.fell_back { " (fallback)" } else { "" },
            if dir_writable(&self.paths.state_dir) { "" } else { " NOT WRITABLE" }
        ));
        lines.push(format!("  log file:    {}", self.paths.log_file.display()));
        lines.push(format!("  tools:       {}", tools.join(", ")));
        let transport_note = match transport {
            TransportKind::Simulated => " (no HTTP client, notifications are simulated)",
            _ => "",
        };
        lines.push(format!("  transport:   {}{}", transport, transport_note));
        lines.push(format!("  live check:  {}", live));

        self.log.info("running diagnostic cycle");
        let report = self.run_cycle();
        lines.push(format!("cycle: {}", self.summarize(&report)));
        Response::ok(lines.join("\n"))
    }

    fn cmd_status(&self, json: bool) -> Response {
        let lock = CycleLock::new(
            &self.paths.lock_file,
            Duration::from_secs(self.config.lock_stale_secs),
        );
        let loop_pid = std::fs::read_to_string(&self.paths.pid_file)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|pid| is_pid_alive(*pid));
        let report = StatusReport {
            process: self.config.process_name.clone(),
            recorded: StatusStore::new(&self.paths.status_file).read(),
            live: LivenessState::from_check(
                ProcessTable::new(self.runner).is_running(&self.config.process_name),
            ),
            lock_age_secs: lock.age().map(|a| a.as_secs()),
            installed: self.read_install_record(),
            loop_pid,
            state_dir: self.paths.state_dir.clone(),
            log_file: self.paths.log_file.clone(),
            recent: self.log.tail(5),
        };

        if json {
            return match serde_json::to_string_pretty(&report) {
                Ok(s) => Response::ok(s),
                Err(e) => Response::error(format!("cannot encode status: {}", e)),
            };
        }

        let mut lines = Vec::new();
        lines.push(format!("process:    {}", report.process));
        lines.push(format!("recorded:   {}", report.recorded));
        lines.push(format!("live:       {}", report.live));
        lines.push(match report.lock_age_secs {
            Some(age) => format!("lock:       held ({}s)", age),
            None => "lock:       free".to_string(),
        });
        lines.push(match &report.installed {
            Some(r) => format!(
                "installed:  {} at {} ({})",
                r.strategy,
                r.location,
                r.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => "installed:  no".to_string(),
        });
        lines.push(match report.loop_pid {
            Some(pid) => format!("loop:       pid {}", pid),
            None => "loop:       not running".to_string(),
        });
        lines.push(format!("state dir:  {}", report.state_dir.display()));
        lines.push(format!("log file:   {}", report.log_file.display()));
        if !report.recent.is_empty() {
            lines.push("recent events:".to_string());
            for line in &report.recent {
                lines.push(format!("  {}", line));
            }
        }
        Response::ok(lines.join("\n"))
    }

    fn config_origin(&self) -> String {
        match &self.config.source {
            Some(path) => path.display().to_string(),
            None => "built-in defaults and environment".to_string(),
        }
    }

    // -----------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------

    fn install_context(&self) -> InstallContext {
        InstallContext {
            exe: self.exe.clone(),
            config_file: Some(self.paths.scheduled_config.clone()),
            service_name: self.config.service_name.clone(),
            process_name: self.config.process_name.clone(),
            interval_secs: self.config.interval_secs,
            state_dir: self.paths.state_dir.clone(),
            pid_file: self.paths.pid_file.clone(),
            stop_helper: self.paths.stop_helper.clone(),
        }
    }

    fn installer<'b>(&'b self, ctx: &'b InstallContext) -> SchedulingInstaller<'b> {
        SchedulingInstaller::new(vec![
            Box::new(
                SystemdTimerStrategy::new(ctx, self.runner).with_unit_dir(&self.targets.unit_dir),
            ),
            Box::new(CronStrategy::new(ctx, self.runner).with_dirs(self.targets.cron_dirs.clone())),
            Box::new(
                BackgroundLoopStrategy::new(ctx, self.runner, self.launcher)
                    .with_user_unit_dir(self.targets.user_unit_dir.clone()),
            ),
        ])
    }

    fn read_install_record(&self) -> Option<InstallRecord> {
        let content = std::fs::read_to_string(&self.paths.install_record).ok()?;
        match serde_yaml::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %self.paths.install_record.display(), "ignoring install record: {}", e);
                None
            }
        }
    }

    fn write_install_record(&self, record: &InstallRecord) -> Result<()> {
        let path = &self.paths.install_record;
        let yaml = serde_yaml::to_string(record)
            .map_err(|e| ProcwatchError::Command(format!("cannot encode install record: {}", e)))?;
        atomic_write(path, yaml.as_bytes()).map_err(|e| ProcwatchError::io(path, e))
    }

    fn cmd_install(&self) -> Response {
        if !is_root() {
            self.log.warn("not running as root; system-wide schedulers will likely be unavailable");
        }
        let host = HostProbe::at(&self.targets.host_root).fingerprint();
        self.log.info(&format!(
            "installing monitor for {} (host: {})",
            self.config.process_name, host
        ));

        // Scheduled runs start with a bare environment; hand them the
        // effective configuration instead of whatever file it came from.
        let snapshot = &self.paths.scheduled_config;
        if let Err(e) = self.config.for_schedule(&self.paths).save(snapshot) {
            self.log.error(&format!("cannot save scheduled configuration: {}", e));
            return Response::error(e.to_string());
        }
        self.log.debug(&format!("scheduled runs load {}", snapshot.display()));

        let ctx = self.install_context();
        let report = match self.installer(&ctx).install(&self.log) {
            Ok(report) => report,
            Err(e) => return Response::error(e.to_string()),
        };

        let mut lines = vec![format!("host: {}", host)];
        lines.extend(report.attempts.iter().map(describe_attempt));
        lines.push(format!(
            "installed via {} at {}",
            report.strategy, report.installed.location
        ));
        if let Err(e) = self.write_install_record(&report.to_record()) {
            self.log.warn(&format!("install record not saved: {}", e));
            lines.push("warning: install record not saved; uninstall will not find it".into());
        }
        Response::ok(lines.join("\n"))
    }

    fn cmd_uninstall(&self) -> Response {
        let mut lines = Vec::new();
        let mut failure = None;

        match self.read_install_record() {
            Some(record) => {
                let ctx = self.install_context();
                match self.installer(&ctx).uninstall(&record, &self.log) {
                    Ok(()) => lines.push(format!("removed {} at {}", record.strategy, record.location)),
                    Err(e) => failure = Some(e.to_string()),
                }
                for file in [&self.paths.install_record, &self.paths.scheduled_config] {
                    if let Err(e) = std::fs::remove_file(file) {
                        tracing::warn!(path = %file.display(), error = %e, "not removed");
                    }
                }
            }
            None => lines.push("nothing installed".to_string()),
        }

        lines.push(self.describe_stop(self.stop()));
        match failure {
            Some(message) => Response::error(message),
            None => Response::ok(lines.join("\n")),
        }
    }

    fn stop(&self) -> StopOutcome {
        stop_loop(&self.paths.pid_file, &self.exe, self.runner, STOP_GRACE)
    }

    fn cmd_stop(&self) -> Response {
        let outcome = self.stop();
        let text = self.describe_stop(outcome.clone());
        if matches!(outcome, StopOutcome::Killed { .. } | StopOutcome::PatternKilled) {
            self.log.info(&text);
        }
        Response::ok(text)
    }

    fn describe_stop(&self, outcome: StopOutcome) -> String {
        match outcome {
            StopOutcome::Killed { pid } => format!("stopped background loop (pid {})", pid),
            StopOutcome::AlreadyGone { pid } => {
                format!("background loop (pid {}) had already exited", pid)
            }
            StopOutcome::PatternKilled => "stopped background loop by command-line match".into(),
            StopOutcome::NothingRunning => "no background loop running".into(),
        }
    }
}


fn describe_attempt(attempt: &Attempt) -> String {
    match &attempt.result {
        AttemptResult::Unavailable(reason) => {
            format!("  {}: unavailable ({})", attempt.strategy, reason)
        }
        AttemptResult::Failed(reason) => format!("  {}: failed ({})", attempt.strategy, reason),
        AttemptResult::Installed => format!("  {}: ok", attempt.strategy),
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
