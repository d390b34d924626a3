//! procwatch CLI, the command-line entry point for the liveness monitor.
//!
//! # Usage
//!
//! ```text
//! procwatch install
//! procwatch run
//! procwatch test
//! procwatch status --json
//! procwatch stop
//! procwatch uninstall
//! procwatch --config ./watch.yaml run
//! ```

use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use procwatch_core::command::{Command, Response};
use procwatch_core::config::Config;
use procwatch_core::infrastructure::ShellRunner;
use procwatch_core::install::background::DetachedLauncher;
use procwatch_core::sys::Sys;


#[derive(Debug, Parser)]
#[command(
    name = "procwatch",
    version,
    about = "Check that a process is alive, on a schedule, and report it"
)]
struct Cli {
    /// Config file [default: /etc/procwatch/config.yaml]
    #[arg(long, global = true, env = "PROCWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Sub,
}


#[derive(Debug, PartialEq, Subcommand)]
enum Sub {
    /// Schedule the monitoring cycle with the best mechanism this host offers
    Install,
    /// Run one monitoring cycle
    Run,
    /// Print host diagnostics, then run one cycle
    Test,
    /// Show recorded state, lock, installation and recent events (writes nothing)
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Stop the background loop
    Stop,
    /// Remove whatever `install` put in place
    Uninstall,
    #[command(hide = true)]
    Loop {
        #[arg(long)]
        iterations: Option<u64>,
    },
}


impl From<Sub> for Command {
    fn from(sub: Sub) -> Command {
        match sub {
            Sub::Install => Command::Install,
            Sub::Run => Command::Run,
            Sub::Test => Command::Test,
            Sub::Status { json } => Command::Status { json },
            Sub::Stop => Command::Stop,
            Sub::Uninstall => Command::Uninstall,
            Sub::Loop { iterations } => Command::Loop { iterations },
        }
    }
}


fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => process::exit(reject(e)),
    };

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("procwatch: {}", e);
            process::exit(1);
        }
    };

    let command: Command = cli.command.into();
    let runner = ShellRunner;
    let launcher = DetachedLauncher;
    let built = if command.is_read_only() {
        Sys::read_only(config, &runner, &launcher)
    } else {
        Sys::new(config, &runner, &launcher)
    };
    let sys = match built {
        Ok(sys) => sys,
        Err(e) => {
            eprintln!("procwatch: {}", e);
            process::exit(1);
        }
    };

    let response = sys.execute(command);
    match &response {
        Response::Ok { output } => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Response::Error { message } => eprintln!("procwatch: {}", message),
    }
    process::exit(response.exit_code());
}


fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}


/// Print a parse failure and return the exit code. Help and version are
/// successes; anything else is an unrecognized command, recorded in the
/// event log when the configuration allows it.
fn reject(err: clap::Error) -> i32 {
    let _ = err.print();
    if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
        return 0;
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let input = args.join(" ");
    tracing::error!(input = %input, "unrecognized command line");

    let config = match Config::load(config_flag(&args).as_deref()) {
        Ok(c) => c,
        Err(_) => return 1,
    };
    let runner = ShellRunner;
    let launcher = DetachedLauncher;
    if let Ok(sys) = Sys::new(config, &runner, &launcher) {
        sys.reject(&input);
    }
    1
}


/// `--config` from a command line clap refused to parse.
fn config_flag(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(value) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(value));
        }
    }
    None
}


#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("procwatch").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_map_to_commands() {
        let cli = parse(&["status", "--json"]).unwrap();
        assert_eq!(Command::from(cli.command), Command::Status { json: true });
        let cli = parse(&["run"]).unwrap();
        assert_eq!(Command::from(cli.command), Command::Run);
    }

    #[test]
    fn config_flag_is_global() {
        let cli = parse(&["test", "--config", "/tmp/watch.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/watch.yaml")));
        assert_eq!(cli.command, Sub::Test);
    }

    #[test]
    fn hidden_loop_still_parses() {
        let cli = parse(&["loop", "--iterations", "3"]).unwrap();
        assert_eq!(cli.command, Sub::Loop { iterations: Some(3) });
        let help = Cli::command().render_help().to_string();
        assert!(!help.lines().any(|l| l.trim_start().starts_with("loop")));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let err = parse(&["frobnicate"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn help_is_not_an_error_kind() {
        let err = parse(&["help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn config_flag_from_raw_args() {
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            config_flag(&args(&["bogus", "--config", "/etc/x.yaml"])),
            Some(PathBuf::from("/etc/x.yaml"))
        );
        assert_eq!(
            config_flag(&args(&["--config=/etc/y.yaml", "bogus"])),
            Some(PathBuf::from("/etc/y.yaml"))
        );
        assert_eq!(config_flag(&args(&["bogus"])), None);
    }
}
