use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Running,
    Stopped,
    /// No record yet. Never written to disk.
    Unknown,
}

impl LivenessState {
    pub fn from_check(running: bool) -> Self {
        if running {
            LivenessState::Running
        } else {
            LivenessState::Stopped
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LivenessState::Running => "running",
            LivenessState::Stopped => "stopped",
            LivenessState::Unknown => "unknown",
        }
    }

    /// Stopped → Running between two consecutive cycles.
    pub fn is_restart(previous: LivenessState, current: LivenessState) -> bool {
        previous == LivenessState::Stopped && current == LivenessState::Running
    }
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LivenessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(LivenessState::Running),
            "stopped" => Ok(LivenessState::Stopped),
            "unknown" => Ok(LivenessState::Unknown),
            other => Err(format!("unknown liveness token: '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_parse_case_insensitively() {
        assert_eq!("running\n".parse::<LivenessState>().unwrap(), LivenessState::Running);
        assert_eq!("STOPPED".parse::<LivenessState>().unwrap(), LivenessState::Stopped);
        assert!("maybe".parse::<LivenessState>().is_err());
    }

    #[test]
    fn restart_only_from_stopped_to_running() {
        use LivenessState::*;
        for previous in [Running, Stopped, Unknown] {
            for current in [Running, Stopped] {
                let expected = previous == Stopped && current == Running;
                assert_eq!(LivenessState::is_restart(previous, current), expected);
            }
        }
    }

    #[test]
    fn serde_uses_lowercase_tokens() {
        let json = serde_json::to_string(&LivenessState::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }
}
