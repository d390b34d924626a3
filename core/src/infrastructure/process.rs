//! Raw process helpers: privilege check, pid liveness, termination, and
//! spawning a process that outlives its parent.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;


/// True if the effective uid is root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}


/// Check if a process with the given PID is alive.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}


/// Kill a process by PID (SIGTERM, then SIGKILL after a grace period).
/// Returns true if the process is gone afterwards.
pub fn kill_pid(pid: u32, grace: Duration) -> bool {
    if !is_pid_alive(pid) {
        return true;
    }
    let raw = pid as libc::pid_t;
    unsafe {
        libc::kill(raw, libc::SIGTERM);
    }

    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < grace {
        if !is_pid_alive(pid) {
            return true;
        }
        std::thread::sleep(step);
        waited += step;
    }

    if is_pid_alive(pid) {
        unsafe {
            libc::kill(raw, libc::SIGKILL);
        }
        std::thread::sleep(step);
    }
    !is_pid_alive(pid)
}


/// Command line of `pid` from procfs, arguments joined by spaces. `None`
/// when procfs is not mounted or the process is gone.
pub fn proc_command_line(pid: u32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    Some(args.join(" "))
}


/// Spawn `program args...` in a new session with stdio detached, so it is not
/// tied to the caller's terminal or lifetime. Returns the child's pid.
///
/// The child handle is dropped without waiting; once the caller exits the
/// child is reparented to init.
pub fn spawn_detached(program: &Path, args: &[&str], envs: &[(&str, String)]) -> std::io::Result<u32> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (key, value) in envs {
        cmd.env(key, value);
    }
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = cmd.spawn()?;
    Ok(child.id())
}
