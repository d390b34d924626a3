//! Command runner abstraction for executing host tools.
//!
//! `CommandRunner` is the seam every host probe goes through: process-table
//! queries, HTTP tools, `systemctl`, `crontab`. `ShellRunner` is the
//! production implementation that spawns `sh -c`. `MockRunner` is the test
//! double that records calls and answers from prefix rules or a queue.

use std::cell::RefCell;
use std::process::Command;


/// Trait for executing shell command strings.
///
/// `Ok` carries stdout of a zero-exit command, `Err` carries stderr (or the
/// spawn failure) otherwise.
pub trait CommandRunner {
    fn run(&self, cmd: &str) -> Result<String, String>;

    /// True if `program` resolves on the PATH of the probing shell.
    fn has_program(&self, program: &str) -> bool {
        self.run(&format!("command -v {}", shell_quote(program))).is_ok()
    }
}


/// Production runner that spawns `sh -c <cmd>`.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        tracing::trace!(cmd, "exec");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| format!("Failed to execute: {}", e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                Err(format!("exited with {}", output.status))
            } else {
                Err(stderr)
            }
        }
    }
}


/// Quote `s` for safe interpolation into an `sh -c` string.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}


/// Test-double runner that records commands and returns pre-configured
/// responses.
///
/// Responses are looked up in order: the first rule whose prefix matches the
/// command, then the sequential queue, then an empty `Ok`.
pub struct MockRunner {
    rules: RefCell<Vec<(String, Result<String, String>)>>,
    responses: RefCell<Vec<Result<String, String>>>,
    commands: RefCell<Vec<String>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            rules: RefCell::new(Vec::new()),
            responses: RefCell::new(reversed),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Answer every command starting with `prefix` with `response`.
    pub fn on(self, prefix: &str, response: Result<&str, &str>) -> Self {
        self.rules.borrow_mut().push((
            prefix.to_string(),
            response.map(str::to_string).map_err(str::to_string),
        ));
        self
    }

    /// Make `command -v <program>` fail, i.e. the tool is not installed.
    pub fn missing(self, program: &str) -> Self {
        let probe = format!("command -v {}", shell_quote(program));
        self.on(&probe, Err("not found"))
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    /// Number of recorded commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        self.commands.borrow_mut().push(cmd.to_string());
        if let Some((_, response)) = self
            .rules
            .borrow()
            .iter()
            .find(|(prefix, _)| cmd.starts_with(prefix.as_str()))
        {
            return response.clone();
        }
        let mut responses = self.responses.borrow_mut();
        if let Some(response) = responses.pop() {
            response
        } else {
            Ok(String::new())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_runner_records_commands() {
        let runner = MockRunner::with_responses(vec![Ok("ok".into()), Ok("ok2".into())]);
        assert!(runner.run("echo hello").is_ok());
        assert!(runner.run("echo world").is_ok());
        let cmds = runner.executed_commands();
        assert_eq!(cmds, vec!["echo hello", "echo world"]);
    }

    #[test]
    fn mock_runner_returns_responses_in_order() {
        let runner = MockRunner::with_responses(vec![
            Ok("first".into()),
            Err("fail".into()),
            Ok("third".into()),
        ]);
        assert_eq!(runner.run("cmd1").unwrap(), "first");
        assert_eq!(runner.run("cmd2").unwrap_err(), "fail");
        assert_eq!(runner.run("cmd3").unwrap(), "third");
    }

    #[test]
    fn rules_take_precedence_over_queue() {
        let runner = MockRunner::with_responses(vec![Ok("queued".into())])
            .on("pgrep", Err("no match"));
        assert_eq!(runner.run("pgrep -x nginx").unwrap_err(), "no match");
        assert_eq!(runner.run("other").unwrap(), "queued");
        assert_eq!(runner.run("other").unwrap(), "");
    }

    #[test]
    fn missing_program_probe() {
        let runner = MockRunner::new().missing("curl");
        assert!(!runner.has_program("curl"));
        assert!(runner.has_program("wget"));
        assert_eq!(runner.count("command -v"), 2);
    }

    #[test]
    fn quote_plain_and_hostile_strings() {
        assert_eq!(shell_quote("nginx"), "nginx");
        assert_eq!(shell_quote("/usr/bin/x"), "/usr/bin/x");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn shell_runner_reports_exit_status() {
        let runner = ShellRunner;
        assert_eq!(runner.run("printf hi").unwrap(), "hi");
        assert!(runner.run("exit 3").is_err());
    }
}
