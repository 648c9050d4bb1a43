//! Persistent record of running forwarder processes.
//!
//! Every `(container, device)` pair with a forwarder has one file holding the
//! forwarder's PID:
//!
//! ```text
//! <state_dir>/
//!   web-1/
//!     http      "31337"
//!     metrics   "31342"
//!   db-1/
//!     pg        "40001"
//! ```
//!
//! The files outlive the daemon, so forwarders still running after a daemon
//! restart can be found again and killed or adopted.
//!
//! All operations take one internal lock for the duration of their file
//! access only. Nothing else (spawning, signalling) happens under it.

use super::error::RegistryError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Default location of the registry.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/devproxy/devices";

/// File-backed `(container, device) -> pid` mapping.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    lock: Mutex<()>,
}

impl Registry {
    /// Open a registry rooted at `root`. Nothing is created until the first
    /// record is written.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Root directory of the registry.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The lock guards no data, so a panic elsewhere cannot leave it inconsistent.
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check that `container` and `device` can be used as a record key.
    pub fn validate_key(container: &str, device: &str) -> Result<(), RegistryError> {
        validate_name(container)?;
        validate_name(device)
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, RegistryError> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    fn device_path(&self, container: &str, device: &str) -> Result<PathBuf, RegistryError> {
        validate_name(device)?;
        Ok(self.container_dir(container)?.join(device))
    }

    /// Record that `pid` serves `device` of `container`, replacing any
    /// previous record for the same device.
    pub fn record(&self, container: &str, device: &str, pid: u32) -> Result<(), RegistryError> {
        let dir = self.container_dir(container)?;
        let path = self.device_path(container, device)?;
        let _guard = self.guard();

        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;

        // Write to a temp file in the same directory and rename it over the
        // record, so readers never see a partial PID.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| io_error(&dir, source))?;
        tmp.write_all(pid.to_string().as_bytes())
            .map_err(|source| io_error(tmp.path(), source))?;
        tmp.persist(&path)
            .map_err(|e| io_error(&path, e.error))?;

        debug!("Recorded {}/{} -> PID {}", container, device, pid);
        Ok(())
    }

    /// PID serving `device` of `container`.
    pub fn lookup(&self, container: &str, device: &str) -> Result<u32, RegistryError> {
        let path = self.device_path(container, device)?;
        let _guard = self.guard();

        match fs::read_to_string(&path) {
            Ok(content) => parse_pid(&path, &content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RegistryError::NotFound {
                container: container.to_string(),
                device: Some(device.to_string()),
            }),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    /// All `(device, pid)` records of `container`, sorted by device name.
    ///
    /// Records that do not contain a PID are skipped with a warning.
    pub fn lookup_all(&self, container: &str) -> Result<Vec<(String, u32)>, RegistryError> {
        let dir = self.container_dir(container)?;
        let _guard = self.guard();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(not_found(container));
            }
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            // Leftover temp files from an interrupted write.
            if name.starts_with('.') {
                continue;
            }

            let path = entry.path();
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Cannot read proxy record {:?}: {}", path, e);
                    continue;
                }
            };

            match parse_pid(&path, &content) {
                Ok(pid) => records.push((name, pid)),
                Err(e) => warn!("Skipping proxy record: {}", e),
            }
        }

        if records.is_empty() {
            return Err(not_found(container));
        }

        records.sort();
        Ok(records)
    }

    /// Remove the record of one device. A missing record is not an error.
    pub fn forget(&self, container: &str, device: &str) -> Result<(), RegistryError> {
        let path = self.device_path(container, device)?;
        let _guard = self.guard();

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Forgot {}/{}", container, device);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    /// Remove every record of `container` and its directory.
    pub fn forget_all(&self, container: &str) -> Result<(), RegistryError> {
        let dir = self.container_dir(container)?;
        let _guard = self.guard();

        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Forgot all proxy records of {}", container);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(&dir, source)),
        }
    }

    /// Containers that have a record directory.
    pub fn containers(&self) -> Result<Vec<String>, RegistryError> {
        let _guard = self.guard();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&self.root, source)),
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| validate_name(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove the container directory if it holds no records.
    pub fn remove_if_empty(&self, container: &str) -> Result<bool, RegistryError> {
        let dir = self.container_dir(container)?;
        let _guard = self.guard();

        match fs::remove_dir(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            // Not empty (ENOTEMPTY has no stable ErrorKind everywhere).
            Err(_) => Ok(false),
        }
    }
}

/// Container and device names become path components.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\0') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn parse_pid(path: &Path, content: &str) -> Result<u32, RegistryError> {
    content
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| RegistryError::CorruptEntry {
            path: path.to_path_buf(),
            content: content.to_string(),
        })
}

fn not_found(container: &str) -> RegistryError {
    RegistryError::NotFound {
        container: container.to_string(),
        device: None,
    }
}

fn io_error(path: &Path, source: io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("devices"));
        (dir, registry)
    }

    #[test]
    fn test_record_and_lookup() {
        let (_dir, reg) = registry();
        reg.record("c1", "web", 1234).unwrap();
        assert_eq!(reg.lookup("c1", "web").unwrap(), 1234);
        assert_eq!(
            fs::read_to_string(reg.root().join("c1").join("web")).unwrap(),
            "1234"
        );
    }

    #[test]
    fn test_record_overwrites() {
        let (_dir, reg) = registry();
        reg.record("c1", "web", 1234).unwrap();
        reg.record("c1", "web", 5678).unwrap();
        assert_eq!(reg.lookup("c1", "web").unwrap(), 5678);
        assert_eq!(reg.lookup_all("c1").unwrap(), vec![("web".to_string(), 5678)]);
    }

    #[test]
    fn test_lookup_missing() {
        let (_dir, reg) = registry();
        assert!(reg.lookup("c1", "web").unwrap_err().is_not_found());
        assert!(reg.lookup_all("c1").unwrap_err().is_not_found());

        reg.record("c1", "db", 1).unwrap();
        assert!(reg.lookup("c1", "web").unwrap_err().is_not_found());
    }

    #[test]
    fn test_lookup_all_sorted() {
        let (_dir, reg) = registry();
        reg.record("c1", "web", 30).unwrap();
        reg.record("c1", "api", 10).unwrap();
        reg.record("c2", "other", 20).unwrap();

        assert_eq!(
            reg.lookup_all("c1").unwrap(),
            vec![("api".to_string(), 10), ("web".to_string(), 30)]
        );
    }

    #[test]
    fn test_forget_one() {
        let (_dir, reg) = registry();
        reg.record("c1", "web", 1).unwrap();
        reg.record("c1", "api", 2).unwrap();

        reg.forget("c1", "web").unwrap();
        assert!(reg.lookup("c1", "web").unwrap_err().is_not_found());
        assert_eq!(reg.lookup("c1", "api").unwrap(), 2);

        // Forgetting again is fine.
        reg.forget("c1", "web").unwrap();
    }

    #[test]
    fn test_forget_all() {
        let (_dir, reg) = registry();
        reg.record("c1", "web", 1).unwrap();
        reg.record("c1", "api", 2).unwrap();
        reg.record("c2", "web", 3).unwrap();

        reg.forget_all("c1").unwrap();
        assert!(!reg.root().join("c1").exists());
        assert!(reg.lookup_all("c1").unwrap_err().is_not_found());
        assert_eq!(reg.lookup("c2", "web").unwrap(), 3);

        reg.forget_all("c1").unwrap();
    }

    #[test]
    fn test_empty_container_is_not_found() {
        let (_dir, reg) = registry();
        reg.record("c1", "web", 1).unwrap();
        reg.forget("c1", "web").unwrap();
        assert!(reg.lookup_all("c1").unwrap_err().is_not_found());
        assert!(reg.remove_if_empty("c1").unwrap());
        assert!(reg.containers().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_entry() {
        let (_dir, reg) = registry();
        reg.record("c1", "good", 42).unwrap();
        fs::write(reg.root().join("c1").join("bad"), "not a pid").unwrap();

        assert!(matches!(
            reg.lookup("c1", "bad"),
            Err(RegistryError::CorruptEntry { .. })
        ));
        assert_eq!(reg.lookup_all("c1").unwrap(), vec![("good".to_string(), 42)]);
    }

    #[test]
    fn test_invalid_names() {
        let (_dir, reg) = registry();
        for bad in ["", "..", ".hidden", "a/b"] {
            assert!(matches!(
                reg.record(bad, "web", 1),
                Err(RegistryError::InvalidName(_))
            ));
            assert!(matches!(
                reg.record("c1", bad, 1),
                Err(RegistryError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_validate_key() {
        assert!(Registry::validate_key("c1", "web").is_ok());
        assert!(matches!(
            Registry::validate_key("c1", "x/../../escaped"),
            Err(RegistryError::InvalidName(name)) if name == "x/../../escaped"
        ));
        assert!(Registry::validate_key("..", "web").is_err());
    }

    #[test]
    fn test_containers() {
        let (_dir, reg) = registry();
        assert!(reg.containers().unwrap().is_empty());

        reg.record("b", "web", 1).unwrap();
        reg.record("a", "web", 2).unwrap();
        assert_eq!(reg.containers().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_survives_reopen() {
        let (dir, reg) = registry();
        reg.record("c1", "web", 77).unwrap();
        drop(reg);

        let reopened = Registry::new(dir.path().join("devices"));
        assert_eq!(reopened.lookup("c1", "web").unwrap(), 77);
    }

    #[test]
    fn test_concurrent_records() {
        let (_dir, reg) = registry();
        let reg = Arc::new(reg);

        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.record("c1", &format!("dev{}", i), 100 + i).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(reg.lookup_all("c1").unwrap().len(), 8);
    }
}
