//! Command: the typed interface for every procwatch operation.
//!
//! Each variant is dispatched by exactly one handler in `Sys::execute()`.
//! The binary maps its argument grammar onto these variants; nothing below
//! the dispatcher knows about argv.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `install` | put the cycle on a schedule, first working strategy wins |
//! | `run` | one monitoring cycle |
//! | `test` | diagnostics, then one cycle |
//! | `status` | report (text or JSON); creates no files or directories |
//! | `stop` | stop the background loop |
//! | `uninstall` | undo `install` |
//! | `loop` | run cycles forever (body of the background loop) |

use serde::{Deserialize, Serialize};


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Install,
    Run,
    Test,
    Status {
        #[serde(default)]
        json: bool,
    },
    Stop,
    Uninstall,
    Loop {
        /// Stop after this many cycles; forever when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iterations: Option<u64>,
    },
}


impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Run => "run",
            Command::Test => "test",
            Command::Status { .. } => "status",
            Command::Stop => "stop",
            Command::Uninstall => "uninstall",
            Command::Loop { .. } => "loop",
        }
    }

    /// Commands that only report. The dispatcher for these is built with
    /// `Sys::read_only`.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Command::Status { .. })
    }
}


/// Result of one dispatched command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok { output: String },
    Error { message: String },
}


impl Response {
    pub fn ok(output: impl Into<String>) -> Response {
        Response::Ok {
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Response {
        Response::Error {
            message: message.into(),
        }
    }

    /// Process exit status for this response.
    pub fn exit_code(&self) -> i32 {
        match self {
            Response::Ok { .. } => 0,
            Response::Error { .. } => 1,
        }
    }
}
