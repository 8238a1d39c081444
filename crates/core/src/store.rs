//! On-disk version store
//!
//! Manages the backup root layout:
//! ```text
//! <backup_root>/
//!   notes.txt_versions/
//!     notes_20240309_070501.000042.txt
//!     notes_20240309_070530.118200.txt
//!   src/
//!     lib.rs_versions/
//!       lib_20240309_070502.500000.rs
//! ```
//!
//! Each backup writes one new version and then evicts the oldest versions
//! beyond `max_versions`, so the cap holds as soon as a backup returns.
//! Version names are reserved with `create_new`; two backups stamped in the
//! same microsecond get consecutive stamps instead of sharing a file.

use crate::config::Config;
use crate::copier::{RetryPolicy, RetryingCopier, Sleeper, ThreadSleeper};
use crate::error::BackupError;
use crate::version::{version_dir, VersionFile, VersionName};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Attempts at finding a free version name before giving up
const RESERVE_ATTEMPTS: u32 = 1000;

/// Outcome of a successful backup
#[derive(Debug, Clone)]
pub struct BackupReport {
    /// Path of the newly written version
    pub version: PathBuf,
    /// Old versions removed to respect the cap
    pub evicted: Vec<PathBuf>,
}

/// Writes timestamped versions and enforces the per-file version cap
pub struct VersionStore<S: Sleeper = ThreadSleeper> {
    backup_root: PathBuf,
    max_versions: usize,
    copier: RetryingCopier<S>,
}

impl VersionStore<ThreadSleeper> {
    /// Build a store from runtime configuration
    pub fn from_config(config: &Config) -> Self {
        let policy = RetryPolicy::new(config.copy_attempts, config.retry_base_delay);
        Self::new(
            config.backup_root.clone(),
            config.max_versions,
            RetryingCopier::new(policy),
        )
    }
}

impl<S: Sleeper> VersionStore<S> {
    pub fn new(backup_root: PathBuf, max_versions: usize, copier: RetryingCopier<S>) -> Self {
        Self {
            backup_root,
            max_versions: max_versions.max(1),
            copier,
        }
    }

    /// Back up `source` (which must live under `source_root`)
    pub fn create_backup(
        &self,
        source: &Path,
        source_root: &Path,
    ) -> Result<BackupReport, BackupError> {
        match fs::metadata(source) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound {
                    path: source.to_path_buf(),
                });
            }
            // Anything else is classified by the copier
            _ => {}
        }

        let (dir, name) = self.locate(source, source_root)?;

        fs::create_dir_all(&dir).map_err(|e| BackupError::Prepare {
            path: source.to_path_buf(),
            reason: format!("cannot create version directory {}", dir.display()),
            source: Some(e),
        })?;

        let version = reserve_version(&dir, &name, Utc::now()).map_err(|e| BackupError::Prepare {
            path: source.to_path_buf(),
            reason: format!("cannot reserve a version file in {}", dir.display()),
            source: Some(e),
        })?;

        if let Err(err) = self.copier.copy(source, &version) {
            discard_partial(&version);
            return Err(err);
        }

        info!(
            "Backup: {} -> {}",
            source.display(),
            version.file_name().unwrap_or_default().to_string_lossy()
        );

        let evicted = self.evict(&dir, &name)?;
        Ok(BackupReport { version, evicted })
    }

    /// All retained versions of `source`, oldest first
    pub fn versions(
        &self,
        source: &Path,
        source_root: &Path,
    ) -> Result<Vec<VersionFile>, BackupError> {
        let (dir, name) = self.locate(source, source_root)?;
        match list_versions(&dir, &name) {
            Ok(versions) => Ok(versions),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(BackupError::Prepare {
                path: source.to_path_buf(),
                reason: format!("cannot list {}", dir.display()),
                source: Some(e),
            }),
        }
    }

    /// Number of retained versions of `source`
    pub fn version_count(&self, source: &Path, source_root: &Path) -> Result<usize, BackupError> {
        Ok(self.versions(source, source_root)?.len())
    }

    fn locate(&self, source: &Path, source_root: &Path) -> Result<(PathBuf, VersionName), BackupError> {
        let relative = source.strip_prefix(source_root).map_err(|_| BackupError::Prepare {
            path: source.to_path_buf(),
            reason: format!("not under source root {}", source_root.display()),
            source: None,
        })?;
        let name = VersionName::for_path(relative).ok_or_else(|| BackupError::Prepare {
            path: source.to_path_buf(),
            reason: "path has no file name".to_string(),
            source: None,
        })?;
        Ok((version_dir(&self.backup_root, relative), name))
    }

    /// Remove the oldest versions beyond the cap.
    ///
    /// A version that is already gone was evicted by a concurrent backup of
    /// the same file and counts as removed.
    fn evict(&self, dir: &Path, name: &VersionName) -> Result<Vec<PathBuf>, BackupError> {
        let versions = list_versions(dir, name).map_err(|source| BackupError::Eviction {
            path: dir.to_path_buf(),
            source,
        })?;

        if versions.len() <= self.max_versions {
            return Ok(Vec::new());
        }

        let excess = versions.len() - self.max_versions;
        let mut evicted = Vec::with_capacity(excess);
        for old in versions.into_iter().take(excess) {
            match fs::remove_file(&old.path) {
                Ok(()) => info!("Removed old version: {}", old.file_name()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Old version already removed: {}", old.file_name());
                }
                Err(source) => {
                    return Err(BackupError::Eviction {
                        path: old.path,
                        source,
                    })
                }
            }
            evicted.push(old.path);
        }

        Ok(evicted)
    }
}

/// Versions of `name` inside `dir`, sorted oldest first
fn list_versions(dir: &Path, name: &VersionName) -> io::Result<Vec<VersionFile>> {
    let mut versions = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if let Some(taken_at) = name.parse(&file_name.to_string_lossy()) {
            versions.push(VersionFile {
                path: entry.path(),
                taken_at,
            });
        }
    }
    versions.sort();
    Ok(versions)
}

/// Create an empty version file stamped `at`, moving one microsecond later
/// while the name is taken
fn reserve_version(dir: &Path, name: &VersionName, at: DateTime<Utc>) -> io::Result<PathBuf> {
    let mut at = at;
    let mut last = None;
    for _ in 0..RESERVE_ATTEMPTS {
        let path = dir.join(name.file_name(&at));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Version name taken, bumping stamp: {}", path.display());
                at += chrono::Duration::microseconds(1);
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| io::Error::from(io::ErrorKind::AlreadyExists)))
}

fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Discarded partial backup {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not discard partial backup {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        source_root: PathBuf,
        backup_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let source_root = temp.path().join("src");
        let backup_root = temp.path().join("backup");
        fs::create_dir_all(&source_root).unwrap();
        Fixture {
            _temp: temp,
            source_root,
            backup_root,
        }
    }

    fn store(backup_root: &Path, max_versions: usize) -> VersionStore {
        VersionStore::new(
            backup_root.to_path_buf(),
            max_versions,
            RetryingCopier::new(RetryPolicy::new(3, Duration::from_millis(1))),
        )
    }

    /// Keep consecutive version stamps distinct
    fn tick() {
        thread::sleep(Duration::from_millis(2));
    }

    #[test]
    fn test_backup_layout() {
        let fx = fixture();
        let nested = fx.source_root.join("docs/notes.txt");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, b"hello").unwrap();

        let report = store(&fx.backup_root, 3)
            .create_backup(&nested, &fx.source_root)
            .unwrap();

        let dir = fx.backup_root.join("docs/notes.txt_versions");
        assert_eq!(report.version.parent().unwrap(), dir);
        let name = report.version.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("notes_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(fs::read(&report.version).unwrap(), b"hello");
        assert!(report.evicted.is_empty());
    }

    #[test]
    fn test_keeps_newest_versions() {
        let fx = fixture();
        let file = fx.source_root.join("a.txt");
        let store = store(&fx.backup_root, 3);

        // creation followed by four modifications
        for content in ["created", "mod1", "mod2", "mod3", "mod4"] {
            fs::write(&file, content).unwrap();
            store.create_backup(&file, &fx.source_root).unwrap();
            tick();
        }

        let versions = store.versions(&file, &fx.source_root).unwrap();
        assert_eq!(versions.len(), 3);
        let contents: Vec<String> = versions
            .iter()
            .map(|v| fs::read_to_string(&v.path).unwrap())
            .collect();
        assert_eq!(contents, vec!["mod2", "mod3", "mod4"]);
        assert!(versions.windows(2).all(|w| w[0].taken_at < w[1].taken_at));
    }

    #[test]
    fn test_zero_byte_file() {
        let fx = fixture();
        let file = fx.source_root.join("empty");
        fs::write(&file, b"").unwrap();

        let report = store(&fx.backup_root, 1)
            .create_backup(&file, &fx.source_root)
            .unwrap();
        assert_eq!(fs::metadata(&report.version).unwrap().len(), 0);
    }

    #[test]
    fn test_deleted_source_leaves_no_garbage() {
        let fx = fixture();
        let file = fx.source_root.join("gone.txt");

        let err = store(&fx.backup_root, 3)
            .create_backup(&file, &fx.source_root)
            .unwrap_err();

        assert!(matches!(err, BackupError::NotFound { .. }));
        assert!(!fx.backup_root.join("gone.txt_versions").exists());
    }

    #[test]
    fn test_directory_source_is_rejected() {
        let fx = fixture();
        let dir = fx.source_root.join("sub");
        fs::create_dir_all(&dir).unwrap();

        let err = store(&fx.backup_root, 3)
            .create_backup(&dir, &fx.source_root)
            .unwrap_err();

        assert!(matches!(err, BackupError::NotAFile { .. }));
        let leftovers = fs::read_dir(fx.backup_root.join("sub_versions")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_source_outside_root() {
        let fx = fixture();
        let outside = fx.backup_root.parent().unwrap().join("outside.txt");
        fs::write(&outside, b"x").unwrap();

        let err = store(&fx.backup_root, 3)
            .create_backup(&outside, &fx.source_root)
            .unwrap_err();
        assert!(matches!(err, BackupError::Prepare { .. }));
    }

    #[test]
    fn test_unrelated_files_survive_eviction() {
        let fx = fixture();
        let file = fx.source_root.join("a.txt");
        fs::write(&file, b"x").unwrap();
        let dir = fx.backup_root.join("a.txt_versions");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("README"), b"keep me").unwrap();
        fs::write(dir.join("a_garbage.txt"), b"keep me").unwrap();

        let store = store(&fx.backup_root, 1);
        for _ in 0..3 {
            store.create_backup(&file, &fx.source_root).unwrap();
            tick();
        }

        assert_eq!(store.version_count(&file, &fx.source_root).unwrap(), 1);
        assert!(dir.join("README").exists());
        assert!(dir.join("a_garbage.txt").exists());
    }

    #[test]
    fn test_failed_eviction_keeps_new_version() {
        let fx = fixture();
        let file = fx.source_root.join("a.txt");
        fs::write(&file, b"fresh").unwrap();
        let dir = fx.backup_root.join("a.txt_versions");
        let stuck = dir.join("a_20000101_000000.000000.txt");
        fs::create_dir_all(stuck.join("inner")).unwrap();

        let err = store(&fx.backup_root, 1)
            .create_backup(&file, &fx.source_root)
            .unwrap_err();

        assert!(matches!(err, BackupError::Eviction { .. }));
        let entries: Vec<PathBuf> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(stuck.join("inner").exists());
        let fresh = entries.iter().find(|p| **p != stuck).unwrap();
        assert_eq!(fs::read(fresh).unwrap(), b"fresh");
    }

    #[test]
    fn test_same_stamp_gets_next_free_name() {
        let fx = fixture();
        let dir = fx.backup_root.join("a.txt_versions");
        fs::create_dir_all(&dir).unwrap();
        let name = VersionName::for_path(Path::new("a.txt")).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();

        let first = reserve_version(&dir, &name, at).unwrap();
        fs::write(&first, b"first").unwrap();
        let second = reserve_version(&dir, &name, at).unwrap();

        assert_eq!(first, dir.join("a_20240309_070501.000000.txt"));
        assert_eq!(second, dir.join("a_20240309_070501.000001.txt"));
        assert_eq!(fs::read(&first).unwrap(), b"first");
        assert_eq!(fs::metadata(&second).unwrap().len(), 0);
    }

    #[test]
    fn test_concurrent_backups_converge_to_cap() {
        let fx = fixture();
        let file = fx.source_root.join("shared.log");
        fs::write(&file, b"contended").unwrap();
        let store = Arc::new(store(&fx.backup_root, 2));
        let source_root = Arc::new(fx.source_root.clone());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let file = file.clone();
                let source_root = Arc::clone(&source_root);
                thread::spawn(move || {
                    for _ in 0..3 {
                        store.create_backup(&file, &source_root).unwrap();
                        tick();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let versions = store.versions(&file, &fx.source_root).unwrap();
        assert!(versions.len() <= 2);
        assert!(!versions.is_empty());
        for version in versions {
            assert_eq!(fs::read(&version.path).unwrap(), b"contended");
        }
    }

    #[test]
    fn test_versions_of_unknown_file() {
        let fx = fixture();
        let store = store(&fx.backup_root, 3);
        let versions = store
            .versions(&fx.source_root.join("never.txt"), &fx.source_root)
            .unwrap();
        assert!(versions.is_empty());
    }
}
