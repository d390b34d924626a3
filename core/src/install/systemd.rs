//! systemd service + timer strategy.
//!
//! Writes `<name>.service` (oneshot running `procwatch run`) and
//! `<name>.timer` (every interval, first run a minute after boot, persistent
//! across downtime), reloads the manager and enables the timer. The same
//! unit pair is reused at user scope by the background strategy.

use std::path::{Path, PathBuf};

use super::{remove_artifact, InstallContext, InstallStrategy, Installed};
use crate::infrastructure::probe::{atomic_write, dir_writable};
use crate::infrastructure::CommandRunner;
use crate::types::{InstallRecord, StrategyKind};


pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitScope {
    System,
    User,
}

impl UnitScope {
    fn systemctl(self) -> &'static str {
        match self {
            UnitScope::System => "systemctl",
            UnitScope::User => "systemctl --user",
        }
    }
}


/// systemd time span for a number of seconds: `60` → `1min`, `90` → `90s`.
pub fn time_span(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!("{}min", secs / 60)
    } else {
        format!("{}s", secs.max(1))
    }
}


/// The service/timer pair for one install.
pub struct TimerUnits<'a> {
    ctx: &'a InstallContext,
    scope: UnitScope,
}

impl<'a> TimerUnits<'a> {
    pub fn new(ctx: &'a InstallContext, scope: UnitScope) -> Self {
        TimerUnits { ctx, scope }
    }

    pub fn service_unit(&self) -> String {
        format!("{}.service", self.ctx.service_name)
    }

    pub fn timer_unit(&self) -> String {
        format!("{}.timer", self.ctx.service_name)
    }

    pub fn render_service(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unit]\n");
        out.push_str(&format!(
            "Description=procwatch liveness check for {}\n",
            self.ctx.process_name
        ));
        if self.scope == UnitScope::System {
            out.push_str("Wants=network-online.target\nAfter=network-online.target\n");
        }
        out.push_str("\n[Service]\nType=oneshot\n");
        if let Some(cfg) = &self.ctx.config_file {
            out.push_str(&format!(
                "Environment=\"{}={}\"\n",
                crate::config::CONFIG_ENV,
                cfg.display()
            ));
        }
        out.push_str(&format!("ExecStart={} run\n", exec_path(&self.ctx.exe)));
        out
    }

    pub fn render_timer(&self) -> String {
        let span = time_span(self.ctx.interval_secs);
        format!(
            "[Unit]\n\
             Description=Run {service} every {span}\n\
             \n\
             [Timer]\n\
             OnBootSec=1min\n\
             OnUnitActiveSec={span}\n\
             Persistent=true\n\
             Unit={service}\n\
             \n\
             [Install]\n\
             WantedBy=timers.target\n",
            service = self.service_unit(),
            span = span,
        )
    }

    /// Write both units into `dir`; returns the written paths.
    pub fn write(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let service = dir.join(self.service_unit());
        let timer = dir.join(self.timer_unit());
        atomic_write(&service, self.render_service().as_bytes())?;
        if let Err(e) = atomic_write(&timer, self.render_timer().as_bytes()) {
            let _ = std::fs::remove_file(&service);
            return Err(e);
        }
        Ok(vec![service, timer])
    }

    /// Reload the manager and start the timer now and at every boot.
    pub fn activate(&self, runner: &dyn CommandRunner) -> Result<(), String> {
        let ctl = self.scope.systemctl();
        runner
            .run(&format!("{} daemon-reload", ctl))
            .map_err(|e| format!("daemon-reload: {}", e.trim()))?;
        runner
            .run(&format!("{} enable --now {}", ctl, self.timer_unit()))
            .map_err(|e| format!("enable {}: {}", self.timer_unit(), e.trim()))?;
        Ok(())
    }

    pub fn deactivate(&self, runner: &dyn CommandRunner) -> Result<(), String> {
        runner
            .run(&format!("{} disable --now {}", self.scope.systemctl(), self.timer_unit()))
            .map(|_| ())
            .map_err(|e| format!("disable {}: {}", self.timer_unit(), e.trim()))
    }

    pub fn reload(&self, runner: &dyn CommandRunner) {
        let _ = runner.run(&format!("{} daemon-reload", self.scope.systemctl()));
    }
}


fn exec_path(exe: &Path) -> String {
    let s = exe.to_string_lossy();
    if s.contains(char::is_whitespace) {
        format!("\"{}\"", s)
    } else {
        s.into_owned()
    }
}


pub struct SystemdTimerStrategy<'a> {
    ctx: &'a InstallContext,
    runner: &'a dyn CommandRunner,
    unit_dir: PathBuf,
}

impl<'a> SystemdTimerStrategy<'a> {
    pub fn new(ctx: &'a InstallContext, runner: &'a dyn CommandRunner) -> Self {
        SystemdTimerStrategy {
            ctx,
            runner,
            unit_dir: PathBuf::from(SYSTEM_UNIT_DIR),
        }
    }

    pub fn with_unit_dir(mut self, dir: &Path) -> Self {
        self.unit_dir = dir.to_path_buf();
        self
    }

    fn units(&self) -> TimerUnits<'a> {
        TimerUnits::new(self.ctx, UnitScope::System)
    }
}

impl InstallStrategy for SystemdTimerStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PeriodicServiceManager
    }

    fn probe(&self) -> Result<(), String> {
        if !self.runner.has_program("systemctl") {
            return Err("systemctl not found".into());
        }
        if !dir_writable(&self.unit_dir) {
            return Err(format!("{} is not writable", self.unit_dir.display()));
        }
        Ok(())
    }

    fn install(&self) -> Result<Installed, String> {
        let units = self.units();
        let written = units
            .write(&self.unit_dir)
            .map_err(|e| format!("cannot write units to {}: {}", self.unit_dir.display(), e))?;
        if let Err(e) = units.activate(self.runner) {
            for path in &written {
                let _ = remove_artifact(path);
            }
            units.reload(self.runner);
            return Err(e);
        }
        Ok(Installed {
            location: self.unit_dir.join(units.timer_unit()).display().to_string(),
            artifacts: written,
        })
    }

    fn uninstall(&self, record: &InstallRecord) -> Result<(), String> {
        let units = self.units();
        let mut problems = Vec::new();
        if let Err(e) = units.deactivate(self.runner) {
            problems.push(e);
        }
        let artifacts: Vec<PathBuf> = if record.artifacts.is_empty() {
            vec![
                self.unit_dir.join(units.service_unit()),
                self.unit_dir.join(units.timer_unit()),
            ]
        } else {
            record.artifacts.iter().map(PathBuf::from).collect()
        };
        for path in &artifacts {
            if let Err(e) = remove_artifact(path) {
                problems.push(e);
            }
        }
        units.reload(self.runner);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MockRunner;
    use crate::install::tests::context;

    #[test]
    fn spans() {
        assert_eq!(time_span(60), "1min");
        assert_eq!(time_span(300), "5min");
        assert_eq!(time_span(90), "90s");
        assert_eq!(time_span(0), "1s");
    }

    #[test]
    fn service_unit_runs_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.config_file = Some(PathBuf::from("/etc/procwatch/config.yaml"));
        let service = TimerUnits::new(&ctx, UnitScope::System).render_service();
        assert!(service.contains("Type=oneshot"));
        assert!(service.contains("ExecStart=/usr/local/bin/procwatch run"));
        assert!(service.contains("Environment=\"PROCWATCH_CONFIG=/etc/procwatch/config.yaml\""));
        assert!(service.contains("for nginx"));
    }

    #[test]
    fn timer_unit_shape() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let timer = TimerUnits::new(&ctx, UnitScope::System).render_timer();
        for line in [
            "OnBootSec=1min",
            "OnUnitActiveSec=1min",
            "Persistent=true",
            "Unit=procwatch.service",
            "WantedBy=timers.target",
        ] {
            assert!(timer.contains(line), "missing {}", line);
        }
    }

    #[test]
    fn exec_path_with_spaces_is_quoted() {
        assert_eq!(exec_path(Path::new("/opt/my tools/procwatch")), "\"/opt/my tools/procwatch\"");
    }

    #[test]
    fn probe_requires_systemctl() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new().missing("systemctl");
        let strategy = SystemdTimerStrategy::new(&ctx, &runner).with_unit_dir(dir.path());
        assert_eq!(strategy.probe().unwrap_err(), "systemctl not found");
    }

    #[test]
    fn probe_requires_writable_unit_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new();
        let strategy =
            SystemdTimerStrategy::new(&ctx, &runner).with_unit_dir(&dir.path().join("absent"));
        assert!(strategy.probe().unwrap_err().contains("not writable"));
    }

    #[test]
    fn install_writes_units_and_enables_timer() {
        let dir = tempfile::tempdir().unwrap();
        let units = dir.path().join("units");
        std::fs::create_dir(&units).unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new();
        let strategy = SystemdTimerStrategy::new(&ctx, &runner).with_unit_dir(&units);
        strategy.probe().unwrap();
        let installed = strategy.install().unwrap();

        assert_eq!(installed.artifacts.len(), 2);
        assert!(units.join("procwatch.service").exists());
        assert!(units.join("procwatch.timer").exists());
        assert!(installed.location.ends_with("procwatch.timer"));
        let cmds: Vec<String> = runner
            .executed_commands()
            .into_iter()
            .filter(|c| c.starts_with("systemctl "))
            .collect();
        assert_eq!(cmds, vec!["systemctl daemon-reload", "systemctl enable --now procwatch.timer"]);
    }

    #[test]
    fn failed_enable_removes_units() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new().on(
            "systemctl enable",
            Err("System has not been booted with systemd"),
        );
        let strategy = SystemdTimerStrategy::new(&ctx, &runner).with_unit_dir(dir.path());
        let err = strategy.install().unwrap_err();
        assert!(err.contains("not been booted"));
        assert!(!dir.path().join("procwatch.service").exists());
        assert!(!dir.path().join("procwatch.timer").exists());
    }

    #[test]
    fn uninstall_disables_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new();
        let strategy = SystemdTimerStrategy::new(&ctx, &runner).with_unit_dir(dir.path());
        let installed = strategy.install().unwrap();
        let record = InstallRecord {
            strategy: StrategyKind::PeriodicServiceManager,
            artifacts: installed
                .artifacts
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            location: installed.location,
            installed_at: chrono::Utc::now(),
        };
        strategy.uninstall(&record).unwrap();
        assert_eq!(runner.count("systemctl disable --now procwatch.timer"), 1);
        assert!(!dir.path().join("procwatch.timer").exists());
    }
}
