//! Record store collaborators.
//!
//! The merge engine loads the whole store once per batch and saves it at most
//! once, at the end. Undo needs exactly one step of history, exposed through
//! [`History`].

use crate::record::{Record, RecordMap};
use crate::{MergeError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Whole-store load and save.
pub trait RecordStore {
    fn load_all(&self) -> Result<RecordMap>;

    /// Replaces the stored records. Either everything is written or nothing.
    fn save_all(&self, records: &RecordMap) -> Result<()>;
}

/// Access to the state immediately preceding the last save.
pub trait History {
    fn previous_snapshot(&self) -> Result<RecordMap>;
}

fn into_map(records: impl IntoIterator<Item = Record>) -> Result<RecordMap> {
    let mut map = RecordMap::new();
    for record in records {
        if let Some(existing) = map.insert(record.id.clone(), record) {
            return Err(MergeError::Persistence(format!(
                "duplicate record ID {}",
                existing.id
            )));
        }
    }
    Ok(map)
}

#[derive(Debug, Default)]
struct MemoryState {
    current: RecordMap,
    previous: Option<RecordMap>,
    #[cfg(test)]
    fail_saves: bool,
    #[cfg(test)]
    loads: usize,
    #[cfg(test)]
    saves: usize,
}

/// In-memory store, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(records: RecordMap) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                current: records,
                ..MemoryState::default()
            }),
        }
    }

    /// Builds a store from records; later duplicates replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self::new(
            records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        )
    }

    /// Makes every following save fail with [`MergeError::Persistence`].
    #[cfg(test)]
    pub(crate) fn fail_saves(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_saves = fail;
        }
    }

    /// Number of `(load_all, save_all)` calls so far.
    #[cfg(test)]
    pub(crate) fn access_counts(&self) -> (usize, usize) {
        self.state
            .lock()
            .map(|state| (state.loads, state.saves))
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| MergeError::Persistence("memory store lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn load_all(&self) -> Result<RecordMap> {
        #[cfg_attr(not(test), allow(unused_mut))]
        let mut state = self.lock()?;
        #[cfg(test)]
        {
            state.loads += 1;
        }
        Ok(state.current.clone())
    }

    fn save_all(&self, records: &RecordMap) -> Result<()> {
        let mut state = self.lock()?;
        #[cfg(test)]
        {
            state.saves += 1;
            if state.fail_saves {
                return Err(MergeError::Persistence("save rejected".to_string()));
            }
        }
        let previous = std::mem::replace(&mut state.current, records.clone());
        state.previous = Some(previous);
        Ok(())
    }
}

impl History for MemoryStore {
    fn previous_snapshot(&self) -> Result<RecordMap> {
        self.lock()?
            .previous
            .clone()
            .ok_or_else(|| MergeError::SnapshotUnavailable("memory store".to_string()))
    }
}

/// Records kept as a JSON array in one file.
///
/// Saves go to `<file>.tmp` first and are renamed into place; the content
/// being replaced is kept as `<file>.prev`, which is the one-step history.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.sibling("prev")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    fn read(path: &Path) -> Result<RecordMap> {
        let contents = fs::read_to_string(path).map_err(|err| persistence(path, err))?;
        let records: Vec<Record> =
            serde_json::from_str(&contents).map_err(|err| persistence(path, err))?;
        into_map(records)
    }
}

fn persistence(path: &Path, err: impl std::fmt::Display) -> MergeError {
    MergeError::Persistence(format!("{}: {err}", path.display()))
}

impl RecordStore for JsonFileStore {
    /// A store file that does not exist yet is an empty store.
    fn load_all(&self) -> Result<RecordMap> {
        if !self.path.exists() {
            return Ok(RecordMap::new());
        }
        Self::read(&self.path)
    }

    fn save_all(&self, records: &RecordMap) -> Result<()> {
        let json = serde_json::to_string_pretty(&records.values().collect::<Vec<_>>())
            .map_err(|err| persistence(&self.path, err))?;

        let tmp = self.sibling("tmp");
        fs::write(&tmp, json).map_err(|err| persistence(&tmp, err))?;

        if self.path.exists() {
            let prev = self.snapshot_path();
            if let Err(err) = fs::copy(&self.path, &prev) {
                let _ = fs::remove_file(&tmp);
                return Err(persistence(&prev, err));
            }
        }
        fs::rename(&tmp, &self.path).map_err(|err| persistence(&self.path, err))?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "saved records");
        Ok(())
    }
}

impl History for JsonFileStore {
    fn previous_snapshot(&self) -> Result<RecordMap> {
        let prev = self.snapshot_path();
        if !prev.exists() {
            return Err(MergeError::SnapshotUnavailable(prev.display().to_string()));
        }
        Self::read(&prev)
    }
}
