//! File-backed local store.
//!
//! The whole store is one JSON snapshot (`data.json` in the data directory)
//! rewritten atomically after every mutation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::local_store::{LocalStore, Snapshot};
use crate::error::{CoreError, StoreError};
use crate::models::{LocalList, LocalTask};

pub struct JsonStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl JsonStore {
    /// Open the store at the default location.
    pub fn open_default() -> Result<Self, CoreError> {
        let path = super::data_dir()?.join("data.json");
        Ok(Self::open(path)?)
    }

    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to the snapshot and write it out if `f` reports a change.
    fn mutate<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Snapshot) -> Result<bool, StoreError>,
    {
        let mut guard = self.snapshot.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = guard.clone();
        if !f(&mut next)? {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&next)?;
        super::write_atomic(&self.path, &bytes).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        *guard = next;
        Ok(())
    }

    fn read(&self) -> Result<std::sync::MutexGuard<'_, Snapshot>, StoreError> {
        self.snapshot.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl LocalStore for JsonStore {
    fn lists(&self) -> Result<Vec<LocalList>, StoreError> {
        Ok(self.read()?.lists.clone())
    }

    fn tasks(&self, list_id: &str) -> Result<Vec<LocalTask>, StoreError> {
        Ok(self.read()?.tasks_of(list_id))
    }

    fn upsert_list(&self, list: LocalList) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.upsert_list(list);
            Ok(true)
        })
    }

    fn upsert_task(&self, task: LocalTask) -> Result<(), StoreError> {
        self.mutate(|s| s.upsert_task(task).map(|()| true))
    }

    fn delete_list(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(|s| Ok(s.delete_list(id)))
    }

    fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(|s| Ok(s.delete_task(id)))
    }
}
