//! Host fingerprint: which init system runs as PID 1 and whether we are
//! inside a container.
//!
//! Detection reads the filesystem under a configurable root so tests can
//! fabricate a host. It only informs the `install` and `test` output; the
//! strategy probes decide what actually gets installed.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSystem {
    Systemd,
    OpenRc,
    SysVinit,
    /// PID 1 is something else; carries its command name when readable.
    Other(String),
    Unknown,
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitSystem::Systemd => f.write_str("systemd"),
            InitSystem::OpenRc => f.write_str("openrc"),
            InitSystem::SysVinit => f.write_str("sysvinit"),
            InitSystem::Other(name) => write!(f, "other ({})", name),
            InitSystem::Unknown => f.write_str("unknown"),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFingerprint {
    pub init: InitSystem,
    pub container: bool,
}

impl fmt::Display for HostFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.container {
            write!(f, "{} (container)", self.init)
        } else {
            write!(f, "{}", self.init)
        }
    }
}


pub struct HostProbe {
    root: PathBuf,
}

impl HostProbe {
    /// Probe a host whose filesystem is mounted at `root`.
    pub fn at(root: &Path) -> Self {
        HostProbe {
            root: root.to_path_buf(),
        }
    }

    pub fn fingerprint(&self) -> HostFingerprint {
        HostFingerprint {
            init: self.init_system(),
            container: self.in_container(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn init_system(&self) -> InitSystem {
        // systemd creates this directory at boot, and only systemd does.
        if self.path("run/systemd/system").is_dir() {
            return InitSystem::Systemd;
        }
        let comm = match std::fs::read_to_string(self.path("proc/1/comm")) {
            Ok(s) => s.trim().to_string(),
            Err(_) => return InitSystem::Unknown,
        };
        match comm.as_str() {
            "systemd" => InitSystem::Systemd,
            "openrc-init" => InitSystem::OpenRc,
            "init" if self.path("sbin/openrc").exists() => InitSystem::OpenRc,
            "init" => InitSystem::SysVinit,
            "" => InitSystem::Unknown,
            other => InitSystem::Other(other.to_string()),
        }
    }

    fn in_container(&self) -> bool {
        if self.path(".dockerenv").exists() || self.path("run/.containerenv").exists() {
            return true;
        }
        match std::fs::read_to_string(self.path("proc/1/cgroup")) {
            Ok(cgroup) => ["docker", "kubepods", "lxc", "containerd"]
                .iter()
                .any(|marker| cgroup.contains(marker)),
            Err(_) => false,
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
