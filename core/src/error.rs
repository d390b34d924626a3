//! Error type shared by the procwatch components.
//!
//! Only configuration loading, path resolution and the dispatcher surface
//! these errors to the user. Everything inside a monitoring cycle degrades to
//! a logged warning instead of propagating.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::LivenessState;


/// Convenience alias for results using the procwatch error type.
pub type Result<T> = std::result::Result<T, ProcwatchError>;


#[derive(Debug, Error)]
pub enum ProcwatchError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("liveness state '{0}' cannot be persisted")]
    UnpersistableState(LivenessState),

    #[error("no scheduling strategy could be installed")]
    NoStrategy,

    #[error("unknown command: '{0}'")]
    UnknownCommand(String),
}


impl ProcwatchError {
    /// Wrap an `io::Error` together with the path it concerns.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        ProcwatchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
