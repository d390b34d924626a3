//! Unprivileged background loop strategy.
//!
//! The last resort, and it always succeeds. It tries to enable a user-scope
//! systemd timer (ignoring any failure), then starts a detached
//! `procwatch loop` in its own session and records its pid in `loop.pid`.
//! A `procwatch-stop.sh` helper is written next to the pid file for
//! tearing the loop down without procwatch itself.
//!
//! `stop_loop` is the paired teardown: signal the recorded pid, and only
//! when no pid file exists fall back to matching the loop's command line.
//! A recorded pid is signalled only while its command line still reads
//! `<exe> loop`; the pid file outlives reboots and pids get reused.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::systemd::{TimerUnits, UnitScope};
use super::{remove_artifact, InstallContext, InstallStrategy, Installed};
use crate::infrastructure::probe::{atomic_write, ensure_writable_dir, write_executable};
use crate::infrastructure::process::{is_pid_alive, kill_pid, proc_command_line, spawn_detached};
use crate::infrastructure::{shell_quote, CommandRunner};
use crate::monitor::liveness::self_excluding_pattern;
use crate::types::{InstallRecord, StrategyKind};


/// Grace period between SIGTERM and SIGKILL when stopping the loop.
pub const STOP_GRACE: Duration = Duration::from_secs(3);


/// Starts the long-running loop process.
pub trait LoopLauncher {
    /// Start `exe args...` detached and return its pid.
    fn launch(&self, exe: &Path, args: &[&str], envs: &[(&str, String)]) -> std::io::Result<u32>;
}


/// Production launcher: new session, null stdio, reparented to init once
/// the installer exits.
pub struct DetachedLauncher;

impl LoopLauncher for DetachedLauncher {
    fn launch(&self, exe: &Path, args: &[&str], envs: &[(&str, String)]) -> std::io::Result<u32> {
        spawn_detached(exe, args, envs)
    }
}


/// `$XDG_CONFIG_HOME/systemd/user`, else `~/.config/systemd/user`.
pub fn default_user_unit_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .map(|config| config.join("systemd").join("user"))
}


pub struct BackgroundLoopStrategy<'a> {
    ctx: &'a InstallContext,
    runner: &'a dyn CommandRunner,
    launcher: &'a dyn LoopLauncher,
    user_unit_dir: Option<PathBuf>,
}

impl<'a> BackgroundLoopStrategy<'a> {
    pub fn new(
        ctx: &'a InstallContext,
        runner: &'a dyn CommandRunner,
        launcher: &'a dyn LoopLauncher,
    ) -> Self {
        BackgroundLoopStrategy {
            ctx,
            runner,
            launcher,
            user_unit_dir: default_user_unit_dir(),
        }
    }

    pub fn with_user_unit_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.user_unit_dir = dir;
        self
    }

    /// Best effort; returns the unit files left enabled.
    fn enable_user_timer(&self) -> Vec<PathBuf> {
        let dir = match &self.user_unit_dir {
            Some(dir) => dir,
            None => return Vec::new(),
        };
        if !self.runner.has_program("systemctl") || !ensure_writable_dir(dir) {
            return Vec::new();
        }
        let units = TimerUnits::new(self.ctx, UnitScope::User);
        let written = match units.write(dir) {
            Ok(written) => written,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "user units not written");
                return Vec::new();
            }
        };
        match units.activate(self.runner) {
            Ok(()) => written,
            Err(e) => {
                tracing::debug!(error = %e, "user timer not enabled");
                for path in &written {
                    let _ = remove_artifact(path);
                }
                Vec::new()
            }
        }
    }

    fn stop_helper_script(&self) -> String {
        let pattern = loop_pattern(&self.ctx.exe);
        format!(
            "#!/bin/sh\n\
             # Stops the procwatch background loop for {process}.\n\
             PIDFILE={pidfile}\n\
             if [ -f \"$PIDFILE\" ]; then\n\
             \x20   PID=\"$(cat \"$PIDFILE\")\"\n\
             \x20   case \"$(ps -o args= -p \"$PID\" 2>/dev/null)\" in\n\
             \x20       *{signature}*) kill \"$PID\" 2>/dev/null ;;\n\
             \x20   esac\n\
             \x20   rm -f \"$PIDFILE\"\n\
             else\n\
             \x20   pkill -f -- {pattern} 2>/dev/null\n\
             fi\n\
             systemctl --user disable --now {timer} 2>/dev/null\n\
             exit 0\n",
            process = self.ctx.process_name,
            pidfile = shell_quote(&self.ctx.pid_file.to_string_lossy()),
            signature = shell_quote(&loop_signature(&self.ctx.exe)),
            pattern = shell_quote(&pattern),
            timer = shell_quote(&format!("{}.timer", self.ctx.service_name)),
        )
    }
}

impl InstallStrategy for BackgroundLoopStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UnprivilegedBackgroundLoop
    }

    fn probe(&self) -> Result<(), String> {
        Ok(())
    }

    fn install(&self) -> Result<Installed, String> {
        let mut artifacts = self.enable_user_timer();
        let mut location = Vec::new();
        if !artifacts.is_empty() {
            location.push("user systemd timer".to_string());
        }

        // Reinstalling replaces the previous loop rather than doubling it.
        stop_loop(&self.ctx.pid_file, &self.ctx.exe, self.runner, STOP_GRACE);

        let envs = self.ctx.entry_env();
        match self.launcher.launch(&self.ctx.exe, &["loop"], &envs) {
            Ok(pid) => match atomic_write(&self.ctx.pid_file, format!("{}\n", pid).as_bytes()) {
                Ok(()) => {
                    location.push(format!("loop pid {}", pid));
                    artifacts.push(self.ctx.pid_file.clone());
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "loop started but pid file not written");
                    location.push(format!("loop pid {} (unrecorded)", pid));
                }
            },
            Err(e) => tracing::warn!(error = %e, "background loop not started"),
        }

        match write_executable(&self.ctx.stop_helper, &self.stop_helper_script()) {
            Ok(()) => artifacts.push(self.ctx.stop_helper.clone()),
            Err(e) => tracing::warn!(path = %self.ctx.stop_helper.display(), error = %e, "stop helper not written"),
        }

        if location.is_empty() {
            location.push("nothing running".to_string());
        }
        Ok(Installed {
            location: location.join(", "),
            artifacts,
        })
    }

    fn uninstall(&self, record: &InstallRecord) -> Result<(), String> {
        stop_loop(&self.ctx.pid_file, &self.ctx.exe, self.runner, STOP_GRACE);
        let units = TimerUnits::new(self.ctx, UnitScope::User);
        let user_units: Vec<&String> = record
            .artifacts
            .iter()
            .filter(|a| a.ends_with(".service") || a.ends_with(".timer"))
            .collect();
        if !user_units.is_empty() {
            let _ = units.deactivate(self.runner);
        }
        let mut problems = Vec::new();
        for artifact in &record.artifacts {
            if let Err(e) = remove_artifact(Path::new(artifact)) {
                problems.push(e);
            }
        }
        if !user_units.is_empty() {
            units.reload(self.runner);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}


/// What the loop's command line contains.
pub fn loop_signature(exe: &Path) -> String {
    format!("{} loop", exe.display())
}


/// Command-line pattern of the loop process that does not match itself.
pub fn loop_pattern(exe: &Path) -> String {
    self_excluding_pattern(&loop_signature(exe))
}


/// True if `pid` is still running `<exe> loop`. Reads procfs, falling back
/// to `ps` where procfs is missing.
pub fn is_loop_process(pid: u32, exe: &Path, runner: &dyn CommandRunner) -> bool {
    let line = match proc_command_line(pid) {
        Some(line) => line,
        None => match runner.run(&format!("ps -o args= -p {}", pid)) {
            Ok(out) => out,
            Err(_) => return false,
        },
    };
    line.contains(&loop_signature(exe))
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Signalled the recorded pid.
    Killed { pid: u32 },
    /// The pid file pointed at a process that no longer exists, or whose
    /// pid now belongs to something other than the loop.
    AlreadyGone { pid: u32 },
    /// No pid file; the pattern fallback matched something.
    PatternKilled,
    NothingRunning,
}


/// Stop the background loop: recorded pid first, pattern match otherwise.
pub fn stop_loop(
    pid_file: &Path,
    exe: &Path,
    runner: &dyn CommandRunner,
    grace: Duration,
) -> StopOutcome {
    let recorded = std::fs::read_to_string(pid_file)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());

    if let Some(pid) = recorded {
        let _ = std::fs::remove_file(pid_file);
        if !is_pid_alive(pid) {
            return StopOutcome::AlreadyGone { pid };
        }
        if !is_loop_process(pid, exe, runner) {
            tracing::debug!(pid, "recorded pid is no longer the loop; leaving it alone");
            return StopOutcome::AlreadyGone { pid };
        }
        if !kill_pid(pid, grace) {
            tracing::warn!(pid, "loop still present after SIGKILL");
        }
        return StopOutcome::Killed { pid };
    }

    let cmd = format!("pkill -f -- {}", shell_quote(&loop_pattern(exe)));
    match runner.run(&cmd) {
        Ok(_) => StopOutcome::PatternKilled,
        Err(_) => StopOutcome::NothingRunning,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MockRunner;
    use crate::install::tests::context;
    use std::cell::RefCell;

    struct RecordingLauncher {
        result: Result<u32, String>,
        launches: RefCell<Vec<(PathBuf, Vec<String>, Vec<(String, String)>)>>,
    }

    impl RecordingLauncher {
        fn ok(pid: u32) -> Self {
            RecordingLauncher {
                result: Ok(pid),
                launches: RefCell::new(Vec::new()),
            }
        }
    }

    impl LoopLauncher for RecordingLauncher {
        fn launch(&self, exe: &Path, args: &[&str], envs: &[(&str, String)]) -> std::io::Result<u32> {
            self.launches.borrow_mut().push((
                exe.to_path_buf(),
                args.iter().map(|a| a.to_string()).collect(),
                envs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            self.result
                .clone()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))
        }
    }

    #[test]
    fn launches_loop_and_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.config_file = Some(PathBuf::from("/home/alice/procwatch.yaml"));
        let runner = MockRunner::new();
        let launcher = RecordingLauncher::ok(4242);
        let strategy =
            BackgroundLoopStrategy::new(&ctx, &runner, &launcher).with_user_unit_dir(None);

        strategy.probe().unwrap();
        let installed = strategy.install().unwrap();

        let launches = launcher.launches.borrow();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, PathBuf::from("/usr/local/bin/procwatch"));
        assert_eq!(launches[0].1, vec!["loop".to_string()]);
        assert_eq!(
            launches[0].2,
            vec![("PROCWATCH_CONFIG".to_string(), "/home/alice/procwatch.yaml".to_string())]
        );
        assert_eq!(std::fs::read_to_string(&ctx.pid_file).unwrap().trim(), "4242");
        assert_eq!(installed.location, "loop pid 4242");
        assert!(installed.artifacts.contains(&ctx.stop_helper));
    }

    #[test]
    fn stop_helper_targets_pid_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new();
        let launcher = RecordingLauncher::ok(4242);
        BackgroundLoopStrategy::new(&ctx, &runner, &launcher)
            .with_user_unit_dir(None)
            .install()
            .unwrap();
        let script = std::fs::read_to_string(&ctx.stop_helper).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(&format!("PIDFILE={}", ctx.pid_file.display())));
        assert!(script.contains("*'/usr/local/bin/procwatch loop'*) kill \"$PID\""));
        assert!(script.contains("pkill -f -- '[/]usr/local/bin/procwatch loop'"));
        let mode = std::fs::metadata(&ctx.stop_helper).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    #[test]
    fn launch_failure_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::new();
        let launcher = RecordingLauncher {
            result: Err("no such file".into()),
            launches: RefCell::new(Vec::new()),
        };
        let installed = BackgroundLoopStrategy::new(&ctx, &runner, &launcher)
            .with_user_unit_dir(None)
            .install()
            .unwrap();
        assert!(!ctx.pid_file.exists());
        assert_eq!(installed.location, "nothing running");
    }

    #[test]
    fn user_timer_enabled_when_possible() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let units = dir.path().join("config/systemd/user");
        let runner = MockRunner::new();
        let launcher = RecordingLauncher::ok(4242);
        let installed = BackgroundLoopStrategy::new(&ctx, &runner, &launcher)
            .with_user_unit_dir(Some(units.clone()))
            .install()
            .unwrap();
        assert!(units.join("procwatch.timer").exists());
        assert_eq!(runner.count("systemctl --user enable --now procwatch.timer"), 1);
        assert!(installed.location.starts_with("user systemd timer, loop pid 4242"));
    }

    #[test]
    fn user_timer_errors_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let units = dir.path().join("units");
        let runner = MockRunner::new().on(
            "systemctl --user enable",
            Err("Failed to connect to bus"),
        );
        let launcher = RecordingLauncher::ok(4242);
        let installed = BackgroundLoopStrategy::new(&ctx, &runner, &launcher)
            .with_user_unit_dir(Some(units.clone()))
            .install()
            .unwrap();
        assert!(!units.join("procwatch.timer").exists());
        assert_eq!(installed.location, "loop pid 4242");
    }

    /// A shell whose command line reads like the loop: `$0` and `$1` land
    /// in its argv. The trailing `:` keeps the shell from exec'ing sleep.
    fn loop_lookalike(exe: &str) -> std::process::Child {
        std::process::Command::new("sh")
            .args(["-c", "sleep 30; :", exe, "loop"])
            .spawn()
            .unwrap()
    }

    #[test]
    fn stop_by_recorded_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("loop.pid");
        let mut child = loop_lookalike("/usr/local/bin/procwatch");
        std::fs::write(&pid_file, format!("{}\n", child.id())).unwrap();
        // Only consulted where procfs is missing.
        let runner = MockRunner::new().on("ps -o args=", Ok("sh -c sleep 30; : /usr/local/bin/procwatch loop\n"));

        let outcome = stop_loop(&pid_file, Path::new("/usr/local/bin/procwatch"), &runner, Duration::from_millis(200));

        assert_eq!(outcome, StopOutcome::Killed { pid: child.id() });
        assert!(!child.wait().unwrap().success());
        assert!(!pid_file.exists());
        assert_eq!(runner.count("pkill"), 0);
    }

    #[test]
    fn reused_pid_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("loop.pid");
        let mut bystander = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&pid_file, format!("{}\n", bystander.id())).unwrap();
        let runner = MockRunner::new().on("ps -o args=", Ok("sleep 30\n"));

        let outcome = stop_loop(&pid_file, Path::new("/usr/local/bin/procwatch"), &runner, Duration::from_millis(200));

        assert_eq!(outcome, StopOutcome::AlreadyGone { pid: bystander.id() });
        assert!(bystander.try_wait().unwrap().is_none());
        assert!(!pid_file.exists());
        assert_eq!(runner.count("pkill"), 0);
        bystander.kill().unwrap();
        bystander.wait().unwrap();
    }

    #[test]
    fn loop_is_recognised_by_command_line() {
        let mut child = loop_lookalike("/opt/procwatch/bin/procwatch");
        let runner = MockRunner::new().on("ps -o args=", Ok("sh -c sleep 30; : /opt/procwatch/bin/procwatch loop\n"));
        assert!(is_loop_process(child.id(), Path::new("/opt/procwatch/bin/procwatch"), &runner));
        assert!(!is_loop_process(child.id(), Path::new("/usr/local/bin/procwatch"), &runner));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn stale_pid_file_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("loop.pid");
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        std::fs::write(&pid_file, pid.to_string()).unwrap();
        let outcome = stop_loop(&pid_file, Path::new("/x/procwatch"), &MockRunner::new(), Duration::ZERO);
        assert_eq!(outcome, StopOutcome::AlreadyGone { pid });
        assert!(!pid_file.exists());
    }

    #[test]
    fn pattern_fallback_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("loop.pid");
        let runner = MockRunner::new();
        let outcome = stop_loop(&pid_file, Path::new("/usr/local/bin/procwatch"), &runner, Duration::ZERO);
        assert_eq!(outcome, StopOutcome::PatternKilled);
        assert_eq!(
            runner.executed_commands(),
            vec!["pkill -f -- '[/]usr/local/bin/procwatch loop'".to_string()]
        );

        let runner = MockRunner::new().on("pkill", Err("exited with exit status: 1"));
        assert_eq!(
            stop_loop(&pid_file, Path::new("/usr/local/bin/procwatch"), &runner, Duration::ZERO),
            StopOutcome::NothingRunning
        );
    }
}
