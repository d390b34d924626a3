//! Filesystem probes and the atomic write primitive.
//!
//! Every "is this location usable" decision in procwatch goes through
//! `dir_writable`, which actually creates and removes a file rather than
//! trusting permission bits (root ignores them, read-only mounts do not).

use std::io::Write;
use std::path::Path;


/// True if a file can be created inside `dir`. The directory must already
/// exist; this never creates it.
pub fn dir_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(format!(".procwatch-probe-{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}


/// Create `dir` (and parents) if needed and report whether it is writable.
pub fn ensure_writable_dir(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    dir_writable(dir)
}


/// Replace `path` with `contents` so that readers see either the old or the
/// new value, never a torn one: write a sibling temp file, fsync, rename.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "procwatch".into());
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}


/// Write an executable (0755) file, replacing any existing one.
pub fn write_executable(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    atomic_write(path, contents.as_bytes())?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_temp_dir_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(dir_writable(dir.path()));
        // The probe file must not be left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_dir_is_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!dir_writable(&dir.path().join("nope")));
    }

    #[test]
    fn ensure_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        assert!(ensure_writable_dir(&nested));
        assert!(nested.is_dir());
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        atomic_write(&path, b"stopped\n").unwrap();
        atomic_write(&path, b"running\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "running\n");
        // Only the target remains; no temp siblings.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn executable_bit_is_set() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop.sh");
        write_executable(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
