//! Advisory cycle lock.
//!
//! An empty marker file whose mtime is the acquisition time. Acquisition
//! uses `create_new` (O_EXCL), so two cycles cannot both create it. An
//! existing marker younger than the stale threshold means another cycle is
//! running; an older one is assumed abandoned by a crashed cycle and is
//! replaced. The age check itself is check-then-act and therefore racy; the
//! worst case is one duplicated cycle.
//!
//! A marker dated in the future (clock stepped backwards) is treated as
//! stale, otherwise it would block every cycle until the clock caught up.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};


#[derive(Debug, Clone)]
pub struct CycleLock {
    path: PathBuf,
    stale_after: Duration,
}


/// Outcome of `CycleLock::acquire`.
#[derive(Debug)]
pub enum Acquire {
    Acquired(LockGuard),
    /// A fresh marker exists; `age` is how old it is.
    Busy { age: Duration },
}


/// Holds the marker; removes it on `release` or drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    /// The marker replaced a stale one.
    pub replaced_stale: bool,
    released: bool,
}


impl CycleLock {
    pub fn new(path: &Path, stale_after: Duration) -> Self {
        CycleLock {
            path: path.to_path_buf(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Age of the current marker, if any.
    pub fn age(&self) -> Option<Duration> {
        let meta = std::fs::metadata(&self.path).ok()?;
        let mtime = meta.modified().ok()?;
        Some(marker_age(mtime, SystemTime::now()))
    }

    pub fn acquire(&self) -> std::io::Result<Acquire> {
        match self.create() {
            Ok(()) => return Ok(Acquire::Acquired(self.guard(false))),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let age = match self.age() {
            Some(age) => age,
            // Vanished between create and stat: whoever held it is done.
            None => Duration::MAX,
        };
        if age < self.stale_after {
            return Ok(Acquire::Busy { age });
        }

        tracing::debug!(path = %self.path.display(), age_secs = age.as_secs(), "replacing stale lock");
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        match self.create() {
            Ok(()) => Ok(Acquire::Acquired(self.guard(true))),
            // Another cycle won the race for the stale marker.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(Acquire::Busy { age: Duration::ZERO })
            }
            Err(e) => Err(e),
        }
    }

    fn create(&self) -> std::io::Result<()> {
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map(|_| ())
    }

    fn guard(&self, replaced_stale: bool) -> LockGuard {
        LockGuard {
            path: self.path.clone(),
            replaced_stale,
            released: false,
        }
    }
}


impl LockGuard {
    /// Remove the marker. Returns the removal error, if any.
    pub fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}


impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}


fn marker_age(mtime: SystemTime, now: SystemTime) -> Duration {
    match now.duration_since(mtime) {
        Ok(age) => age,
        Err(_) => Duration::MAX,
    }
}
