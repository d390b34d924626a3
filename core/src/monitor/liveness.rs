//! Process liveness detection.
//!
//! `ProcessTable` answers "is a process called X running?" by trying three
//! independent lookups and returning true on the first hit:
//!
//! 1. exact process-name match (`pgrep -x`)
//! 2. command-line substring match (`pgrep -f`)
//! 3. full listing (`ps -eo pid,args`) filtered here
//!
//! A wrapped or scripted launch is invisible to (1) but visible to (2)/(3).
//! Any process whose command line merely contains the name also counts;
//! that over-detection is accepted.

use crate::infrastructure::{shell_quote, CommandRunner};


pub trait LivenessChecker {
    fn is_running(&self, process_name: &str) -> bool;
}


/// Liveness lookups against the host process table via a `CommandRunner`.
pub struct ProcessTable<'a> {
    runner: &'a dyn CommandRunner,
    own_pid: u32,
}

impl<'a> ProcessTable<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        ProcessTable {
            runner,
            own_pid: std::process::id(),
        }
    }

    fn exact_name(&self, name: &str) -> bool {
        self.runner
            .run(&format!("pgrep -x -- {}", shell_quote(name)))
            .map(|out| !out.trim().is_empty())
            .unwrap_or(false)
    }

    fn command_line(&self, name: &str) -> bool {
        let pattern = self_excluding_pattern(name);
        self.runner
            .run(&format!("pgrep -f -- {}", shell_quote(&pattern)))
            .map(|out| {
                out.lines()
                    .filter_map(|l| l.trim().parse::<u32>().ok())
                    .any(|pid| pid != self.own_pid)
            })
            .unwrap_or(false)
    }

    fn listing(&self, name: &str) -> bool {
        match self.runner.run("ps -eo pid=,args=") {
            Ok(out) => listing_contains(&out, name, self.own_pid),
            Err(_) => false,
        }
    }
}

impl LivenessChecker for ProcessTable<'_> {
    fn is_running(&self, process_name: &str) -> bool {
        if process_name.is_empty() {
            return false;
        }
        self.exact_name(process_name)
            || self.command_line(process_name)
            || self.listing(process_name)
    }
}


/// Build an extended regex matching `name` literally whose own text does not
/// match it: `nginx` → `[n]ginx`. The probing `sh -c` carries the pattern in
/// its argv, and this keeps `pgrep -f` from finding that shell.
pub fn self_excluding_pattern(name: &str) -> String {
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return String::new(),
    };
    let head = match first {
        // Characters special inside a bracket expression.
        ']' | '^' | '\\' | '-' | '[' => format!("\\{}", first),
        c => format!("[{}]", c),
    };
    let mut out = head;
    for c in chars {
        if "\\.^$|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}


/// True if a `pid args` listing has a line, other than `own_pid`'s, whose
/// args contain `name`.
fn listing_contains(listing: &str, name: &str, own_pid: u32) -> bool {
    listing.lines().any(|line| {
        let line = line.trim_start();
        let (pid, args) = match line.split_once(char::is_whitespace) {
            Some(parts) => parts,
            None => return false,
        };
        if pid.parse::<u32>().ok() == Some(own_pid) {
            return false;
        }
        args.contains(name)
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MockRunner;

    #[test]
    fn exact_match_short_circuits() {
        let runner = MockRunner::new().on("pgrep -x", Ok("1234\n"));
        let table = ProcessTable::new(&runner);
        assert!(table.is_running("nginx"));
        assert_eq!(runner.executed_commands(), vec!["pgrep -x -- nginx"]);
    }

    #[test]
    fn falls_through_to_command_line_match() {
        let runner = MockRunner::new()
            .on("pgrep -x", Err(""))
            .on("pgrep -f", Ok("4321\n"));
        let table = ProcessTable::new(&runner);
        assert!(table.is_running("worker.py"));
        assert_eq!(runner.count("pgrep -f"), 1);
        assert_eq!(runner.count("ps "), 0);
    }

    #[test]
    fn command_line_match_ignores_own_pid() {
        let own = std::process::id().to_string();
        let runner = MockRunner::new()
            .on("pgrep -x", Err(""))
            .on("pgrep -f", Ok(own.as_str()))
            .on("ps ", Ok(""));
        let table = ProcessTable::new(&runner);
        assert!(!table.is_running("procwatch"));
    }

    #[test]
    fn falls_through_to_listing() {
        let runner = MockRunner::new()
            .on("pgrep", Err(""))
            .on("ps ", Ok("    1 /sbin/init\n  812 python3 /opt/app/worker.py --queue\n"));
        let table = ProcessTable::new(&runner);
        assert!(table.is_running("worker.py"));
        assert_eq!(runner.executed_commands().len(), 3);
    }

    #[test]
    fn all_strategies_negative() {
        let runner = MockRunner::new()
            .on("pgrep", Err(""))
            .on("ps ", Ok("    1 /sbin/init\n"));
        assert!(!ProcessTable::new(&runner).is_running("nginx"));
    }

    #[test]
    fn broken_tools_mean_not_running() {
        let runner = MockRunner::new()
            .on("pgrep", Err("sh: pgrep: not found"))
            .on("ps ", Err("sh: ps: not found"));
        assert!(!ProcessTable::new(&runner).is_running("nginx"));
    }

    #[test]
    fn empty_name_is_never_running() {
        let runner = MockRunner::new().on("pgrep", Ok("1\n"));
        assert!(!ProcessTable::new(&runner).is_running(""));
        assert!(runner.executed_commands().is_empty());
    }

    #[test]
    fn hostile_names_are_quoted() {
        let runner = MockRunner::new().on("pgrep -x", Ok("9\n"));
        ProcessTable::new(&runner).is_running("a b'c");
        assert_eq!(runner.executed_commands()[0], r"pgrep -x -- 'a b'\''c'");
    }

    #[test]
    fn pattern_brackets_first_char_and_escapes_rest() {
        assert_eq!(self_excluding_pattern("nginx"), "[n]ginx");
        assert_eq!(self_excluding_pattern("worker.py"), "[w]orker\\.py");
        assert_eq!(self_excluding_pattern("-x"), "\\-x");
        assert_eq!(self_excluding_pattern("a+b"), "[a]\\+b");
        assert_eq!(self_excluding_pattern(""), "");
    }

    #[test]
    fn listing_skips_own_pid_and_malformed_lines() {
        let listing = format!("{} procwatch run nginx\ngarbage\n", std::process::id());
        assert!(!listing_contains(&listing, "nginx", std::process::id()));
        assert!(listing_contains(" 77 nginx: master\n", "nginx", std::process::id()));
    }

    #[test]
    fn real_process_table_finds_a_sleeper() {
        use crate::infrastructure::ShellRunner;

        let runner = ShellRunner;
        if !runner.has_program("ps") {
            return;
        }
        let mut child = std::process::Command::new("sleep")
            .arg("27.5")
            .spawn()
            .unwrap();
        assert!(ProcessTable::new(&runner).is_running("27.5"));
        let _ = child.kill();
        let _ = child.wait();
    }
}
