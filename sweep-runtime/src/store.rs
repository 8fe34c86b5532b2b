//! Result store
//!
//! Durable mapping from domain to outcome. Only accessible results reach
//! disk; every other outcome lives in the in-memory seen index for the
//! rest of the run. The snapshot file is replaced atomically on each write:
//! a reader sees either the previous snapshot or the next one.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use sweep_core::{ProbeResult, Snapshot, SnapshotError};

/// Errors from the result store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read snapshot {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Snapshot {path} is malformed, refusing to overwrite it: {source}")]
    Malformed { path: PathBuf, source: SnapshotError },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write snapshot {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Snapshot plus the resume index, backed by one JSON file
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    snapshot: Snapshot,
    seen: HashSet<String>,
}

impl ResultStore {
    /// Load the snapshot at `path`, or start empty if there is none
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let snapshot = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => {
                warn!("Snapshot {} is empty, starting fresh", path.display());
                Snapshot::new()
            }
            Ok(raw) => Snapshot::from_json(&raw).map_err(|source| StoreError::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting fresh", path.display());
                Snapshot::new()
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let seen: HashSet<String> = snapshot.domains().map(str::to_string).collect();
        if !seen.is_empty() {
            info!("Loaded {} accessible sites from {}", seen.len(), path.display());
        }

        Ok(Self {
            path,
            snapshot,
            seen,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `domain` already has an outcome, from this run or a previous one
    pub fn contains(&self, domain: &str) -> bool {
        self.seen.contains(domain)
    }

    /// Record an outcome.
    ///
    /// Returns `Ok(true)` when the result was appended to the snapshot and
    /// written. On a write error the result stays in memory and goes out
    /// with the next successful write.
    pub fn record(&mut self, result: ProbeResult) -> Result<bool, StoreError> {
        self.seen.insert(result.domain.clone());

        if !result.is_accessible() {
            return Ok(false);
        }

        if !self.snapshot.push(result) {
            return Ok(false);
        }

        self.write()?;
        Ok(true)
    }

    /// Rewrite the snapshot regardless of changes
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.snapshot.touch();
        self.write()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn accessible_count(&self) -> usize {
        self.snapshot.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    fn write(&self) -> Result<(), StoreError> {
        let json = self.snapshot.to_json()?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "Saved {} accessible sites to {}",
            self.snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Write to a temp file next to `path`, fsync, then rename over `path`
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_core::{ProbeStatus, TargetEntry};

    fn result(domain: &str, status: ProbeStatus) -> ProbeResult {
        ProbeResult::new(&TargetEntry::new(domain, "label"), status)
    }

    fn on_disk(path: &Path) -> Snapshot {
        Snapshot::from_json(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("sites.json")).unwrap();
        assert_eq!(store.accessible_count(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_record_accessible_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let mut store = ResultStore::open(&path).unwrap();

        assert!(store.record(result("aaaaaaaaaaaaaaaa.onion", ProbeStatus::Accessible)).unwrap());
        assert!(store.contains("aaaaaaaaaaaaaaaa.onion"));

        let snapshot = on_disk(&path);
        assert_eq!(snapshot.total_accessible_sites, 1);
        assert_eq!(snapshot.accessible_sites[0].domain, "aaaaaaaaaaaaaaaa.onion");
    }

    #[test]
    fn test_non_accessible_is_seen_but_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let mut store = ResultStore::open(&path).unwrap();

        assert!(!store.record(result("bbbbbbbbbbbbbbbb.onion", ProbeStatus::Inaccessible)).unwrap());
        assert!(!store.record(result("cccccccccccccccc.onion", ProbeStatus::Error)).unwrap());

        assert!(store.contains("bbbbbbbbbbbbbbbb.onion"));
        assert!(store.contains("cccccccccccccccc.onion"));
        assert_eq!(store.seen_count(), 2);
        assert_eq!(store.accessible_count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_invariants_hold_after_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let mut store = ResultStore::open(&path).unwrap();

        for domain in ["aaaaaaaaaaaaaaaa.onion", "bbbbbbbbbbbbbbbb.onion", "aaaaaaaaaaaaaaaa.onion"] {
            store.record(result(domain, ProbeStatus::Accessible)).unwrap();

            let snapshot = on_disk(&path);
            assert_eq!(snapshot.total_accessible_sites, snapshot.accessible_sites.len());
            let unique: HashSet<_> = snapshot.domains().collect();
            assert_eq!(unique.len(), snapshot.len());
        }

        assert_eq!(store.accessible_count(), 2);
    }

    #[test]
    fn test_reopen_hydrates_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");

        let mut store = ResultStore::open(&path).unwrap();
        store.record(result("aaaaaaaaaaaaaaaa.onion", ProbeStatus::Accessible)).unwrap();
        store.record(result("bbbbbbbbbbbbbbbb.onion", ProbeStatus::Inaccessible)).unwrap();
        drop(store);

        let store = ResultStore::open(&path).unwrap();
        assert!(store.contains("aaaaaaaaaaaaaaaa.onion"));
        // Inaccessible outcomes are not durable
        assert!(!store.contains("bbbbbbbbbbbbbbbb.onion"));
    }

    #[test]
    fn test_malformed_snapshot_is_fatal_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        fs::write(&path, "{\"accessible_sites\": [").unwrap();

        let err = ResultStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"accessible_sites\": [");
    }

    #[test]
    fn test_write_failure_keeps_result_for_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let missing_dir = dir.path().join("not-yet");
        let path = missing_dir.join("sites.json");
        let mut store = ResultStore::open(&path).unwrap();

        let err = store
            .record(result("aaaaaaaaaaaaaaaa.onion", ProbeStatus::Accessible))
            .unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(store.contains("aaaaaaaaaaaaaaaa.onion"));

        fs::create_dir(&missing_dir).unwrap();
        store.flush().unwrap();
        assert_eq!(on_disk(&path).len(), 1);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let mut store = ResultStore::open(&path).unwrap();

        store.record(result("aaaaaaaaaaaaaaaa.onion", ProbeStatus::Accessible)).unwrap();
        store.record(result("bbbbbbbbbbbbbbbb.onion", ProbeStatus::Accessible)).unwrap();
        store.flush().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("sites.json")]);
    }
}
