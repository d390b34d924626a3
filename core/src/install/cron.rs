//! cron strategy.
//!
//! Prefers a system-wide periodic directory, tried in order: `/etc/cron.d`
//! gets a crontab-format descriptor, the `cron.{hourly,daily,weekly,monthly}`
//! folders get an executable script (and run at that folder's cadence).
//! With none writable it falls back to the invoking user's crontab, where
//! the entry carries a marker comment so reinstalling replaces it.

use std::path::{Path, PathBuf};

use super::{remove_artifact, InstallContext, InstallStrategy, Installed};
use crate::infrastructure::probe::{atomic_write, dir_writable, write_executable};
use crate::infrastructure::{shell_quote, CommandRunner};
use crate::types::{InstallRecord, StrategyKind};


pub const CRON_DIRS: [&str; 5] = [
    "/etc/cron.d",
    "/etc/cron.hourly",
    "/etc/cron.daily",
    "/etc/cron.weekly",
    "/etc/cron.monthly",
];

pub const USER_CRONTAB: &str = "user crontab";


/// Five-field schedule for an interval. cron's resolution is one minute.
pub fn schedule(interval_secs: u64) -> String {
    let minutes = (interval_secs / 60).max(1);
    if minutes == 1 {
        "* * * * *".to_string()
    } else if minutes < 60 {
        format!("*/{} * * * *", minutes)
    } else {
        "0 * * * *".to_string()
    }
}


/// `table` with every line carrying `marker` removed and `line` appended.
pub fn with_entry(table: &str, marker: &str, line: Option<&str>) -> String {
    let mut lines: Vec<&str> = table
        .lines()
        .filter(|l| !l.contains(marker))
        .collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if let Some(line) = line {
        lines.push(line);
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}


pub struct CronStrategy<'a> {
    ctx: &'a InstallContext,
    runner: &'a dyn CommandRunner,
    dirs: Vec<PathBuf>,
}

impl<'a> CronStrategy<'a> {
    pub fn new(ctx: &'a InstallContext, runner: &'a dyn CommandRunner) -> Self {
        CronStrategy {
            ctx,
            runner,
            dirs: CRON_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.dirs = dirs;
        self
    }

    fn marker(&self) -> String {
        format!("# procwatch:{}", self.ctx.service_name)
    }

    /// run-parts and cron.d both skip names with dots or odd characters.
    fn file_name(&self) -> String {
        self.ctx
            .service_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
            .collect()
    }

    fn descriptor(&self) -> String {
        format!(
            "# Installed by procwatch; watches {}.\n\
             SHELL=/bin/sh\n\
             PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
             {} root {} >/dev/null 2>&1\n",
            self.ctx.process_name,
            schedule(self.ctx.interval_secs),
            self.ctx.entry_command("run"),
        )
    }

    fn script(&self) -> String {
        format!(
            "#!/bin/sh\n\
             # Installed by procwatch; watches {}.\n\
             exec {} >/dev/null 2>&1\n",
            self.ctx.process_name,
            self.ctx.entry_command("run"),
        )
    }

    fn install_in(&self, dir: &Path) -> Result<Installed, String> {
        let path = dir.join(self.file_name());
        let is_cron_d = dir.file_name().is_some_and(|n| n == "cron.d");
        let written = if is_cron_d {
            atomic_write(&path, self.descriptor().as_bytes()).and_then(|()| {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            })
        } else {
            tracing::warn!(dir = %dir.display(), "periodic folder runs at its own cadence, not every interval");
            write_executable(&path, &self.script())
        };
        written.map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
        Ok(Installed {
            location: dir.display().to_string(),
            artifacts: vec![path],
        })
    }

    fn current_crontab(&self) -> Result<String, String> {
        match self.runner.run("crontab -l") {
            Ok(table) => Ok(table),
            Err(e) if e.contains("no crontab") => Ok(String::new()),
            Err(e) => Err(format!("cannot read crontab: {}", e.trim())),
        }
    }

    fn load_crontab(&self, table: &str) -> Result<(), String> {
        let tmp = self.ctx.state_dir.join(".crontab.new");
        std::fs::write(&tmp, table)
            .map_err(|e| format!("cannot stage crontab at {}: {}", tmp.display(), e))?;
        let loaded = self
            .runner
            .run(&format!("crontab {}", shell_quote(&tmp.to_string_lossy())));
        let _ = std::fs::remove_file(&tmp);
        loaded
            .map(|_| ())
            .map_err(|e| format!("cannot load crontab: {}", e.trim()))
    }

    fn install_user_crontab(&self) -> Result<Installed, String> {
        let line = format!(
            "{} {} >/dev/null 2>&1 {}",
            schedule(self.ctx.interval_secs),
            self.ctx.entry_command("run"),
            self.marker()
        );
        let table = with_entry(&self.current_crontab()?, &self.marker(), Some(&line));
        self.load_crontab(&table)?;
        Ok(Installed {
            location: USER_CRONTAB.into(),
            artifacts: Vec::new(),
        })
    }
}

impl InstallStrategy for CronStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TableDrivenScheduler
    }

    fn probe(&self) -> Result<(), String> {
        if self.dirs.iter().any(|d| dir_writable(d)) {
            return Ok(());
        }
        if self.runner.has_program("crontab") {
            return Ok(());
        }
        Err("no writable cron directory and no crontab command".into())
    }

    fn install(&self) -> Result<Installed, String> {
        match self.dirs.iter().find(|d| dir_writable(d)) {
            Some(dir) => self.install_in(dir),
            None => self.install_user_crontab(),
        }
    }

    fn uninstall(&self, record: &InstallRecord) -> Result<(), String> {
        if record.location == USER_CRONTAB {
            let table = with_entry(&self.current_crontab()?, &self.marker(), None);
            return self.load_crontab(&table);
        }
        let mut problems = Vec::new();
        for artifact in &record.artifacts {
            if let Err(e) = remove_artifact(Path::new(artifact)) {
                problems.push(e);
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}
