//! Persisted liveness state from the most recent completed cycle.
//!
//! A single-line token (`running` / `stopped`) in one file, replaced
//! atomically. Absent or unreadable → `Unknown`.

use std::path::{Path, PathBuf};

use crate::error::{ProcwatchError, Result};
use crate::infrastructure::probe;
use crate::types::LivenessState;


#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}


impl StatusStore {
    pub fn new(path: &Path) -> Self {
        StatusStore {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> LivenessState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return LivenessState::Unknown,
        };
        match content.parse::<LivenessState>() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring status record: {}", e);
                LivenessState::Unknown
            }
        }
    }

    /// Replace the record. `Unknown` is never persisted.
    pub fn write(&self, state: LivenessState) -> Result<()> {
        if state == LivenessState::Unknown {
            return Err(ProcwatchError::UnpersistableState(state));
        }
        let line = format!("{}\n", state.as_str());
        probe::atomic_write(&self.path, line.as_bytes())
            .map_err(|e| ProcwatchError::io(&self.path, e))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StatusStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(&dir.path().join("status"));
        (dir, store)
    }

    #[test]
    fn absent_record_is_unknown() {
        let (_dir, store) = store();
        assert_eq!(store.read(), LivenessState::Unknown);
    }

    #[test]
    fn last_write_wins() {
        let (_dir, store) = store();
        store.write(LivenessState::Stopped).unwrap();
        assert_eq!(store.read(), LivenessState::Stopped);
        store.write(LivenessState::Running).unwrap();
        assert_eq!(store.read(), LivenessState::Running);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "running\n");
    }

    #[test]
    fn garbage_record_is_unknown() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "half-writ").unwrap();
        assert_eq!(store.read(), LivenessState::Unknown);
    }

    #[test]
    fn unknown_is_never_written() {
        let (_dir, store) = store();
        assert!(matches!(
            store.write(LivenessState::Unknown),
            Err(ProcwatchError::UnpersistableState(LivenessState::Unknown))
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn write_into_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(&dir.path().join("gone").join("status"));
        let err = store.write(LivenessState::Running).unwrap_err();
        assert!(matches!(err, ProcwatchError::Io { .. }));
    }
}
