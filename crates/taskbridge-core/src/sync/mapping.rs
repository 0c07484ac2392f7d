//! Identity mapper: 1:1 correspondence between local and remote ids.
//!
//! Lists and tasks each keep a forward map (local -> remote) and an inverse
//! map (remote -> local) that are only ever updated together. Binding a pair
//! evicts whatever either side was bound to before.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::data_dir;
use crate::sync::types::SyncError;

const MAPPING_FILE: &str = "mappings.json";

#[derive(Debug, Clone, Default)]
struct BiMap {
    forward: HashMap<String, String>,
    inverse: HashMap<String, String>,
}

impl BiMap {
    fn get(&self, local: &str) -> Option<&str> {
        self.forward.get(local).map(String::as_str)
    }

    fn get_inverse(&self, remote: &str) -> Option<&str> {
        self.inverse.get(remote).map(String::as_str)
    }

    /// Bind `local <-> remote`, returning the pairs that had to be broken.
    fn insert(&mut self, local: &str, remote: &str) -> Vec<(String, String)> {
        if self.get(local) == Some(remote) {
            return Vec::new();
        }
        let mut evicted = Vec::new();
        if let Some(old_remote) = self.forward.remove(local) {
            self.inverse.remove(&old_remote);
            evicted.push((local.to_string(), old_remote));
        }
        if let Some(old_local) = self.inverse.remove(remote) {
            self.forward.remove(&old_local);
            evicted.push((old_local, remote.to_string()));
        }
        self.forward.insert(local.to_string(), remote.to_string());
        self.inverse.insert(remote.to_string(), local.to_string());
        evicted
    }

    fn remove(&mut self, local: &str) -> Option<String> {
        let remote = self.forward.remove(local)?;
        self.inverse.remove(&remote);
        Some(remote)
    }

    fn len(&self) -> usize {
        self.forward.len()
    }

    fn sorted_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .forward
            .iter()
            .map(|(l, r)| (l.clone(), r.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}

#[derive(Debug, Clone)]
struct TaskMeta {
    list_id: String,
    synced_at: Option<DateTime<Utc>>,
}

/// A mapped task as seen from one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMapping {
    pub local_id: String,
    pub remote_id: String,
    pub synced_at: Option<DateTime<Utc>>,
}

/// A mapping mutation computed by a list worker and applied by the
/// coordinating task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingChange {
    BindList {
        local_id: String,
        remote_id: String,
    },
    UnbindList {
        local_id: String,
    },
    BindTask {
        list_id: String,
        local_id: String,
        remote_id: String,
        synced_at: Option<DateTime<Utc>>,
    },
    UnbindTask {
        local_id: String,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTask {
    remote_id: String,
    list_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingFile {
    #[serde(default)]
    lists: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    list_synced_at: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    tasks: BTreeMap<String, StoredTask>,
}

/// Persistent local <-> remote identity table.
#[derive(Debug, Clone)]
pub struct IdentityMapper {
    path: PathBuf,
    lists: BiMap,
    list_synced: HashMap<String, DateTime<Utc>>,
    tasks: BiMap,
    task_meta: HashMap<String, TaskMeta>,
}

impl IdentityMapper {
    /// Empty mapper persisting to `path` (for testing or custom layouts).
    pub fn new_with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lists: BiMap::default(),
            list_synced: HashMap::new(),
            tasks: BiMap::default(),
            task_meta: HashMap::new(),
        }
    }

    /// Load `mappings.json` from the data directory.
    pub fn open_default() -> Result<Self, crate::error::CoreError> {
        let path = data_dir()?.join(MAPPING_FILE);
        Ok(Self::load(path)?)
    }

    /// Load from `path`. A missing file yields an empty mapper.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let mut mapper = Self::new_with_path(path);
        let content = match std::fs::read_to_string(&mapper.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(mapper),
            Err(e) => return Err(e.into()),
        };
        let file: MappingFile = serde_json::from_str(&content)
            .map_err(|e| SyncError::Decode(format!("{}: {e}", mapper.path.display())))?;

        for (local, remote) in &file.lists {
            mapper.set_list_mapping(local, remote);
            if let Some(at) = file.list_synced_at.get(local) {
                mapper.set_list_synced_at(local, Some(*at));
            }
        }
        for (local, stored) in &file.tasks {
            mapper.set_task_mapping(&stored.list_id, local, &stored.remote_id, stored.synced_at);
        }
        tracing::debug!(
            lists = mapper.list_count(),
            tasks = mapper.task_count(),
            "loaded identity mappings"
        );
        Ok(mapper)
    }

    /// Atomically replace the mapping file with the current table.
    pub fn persist(&self) -> Result<(), SyncError> {
        let file = MappingFile {
            lists: self.lists.forward.clone().into_iter().collect(),
            list_synced_at: self
                .list_synced
                .iter()
                .map(|(local, at)| (local.clone(), *at))
                .collect(),
            tasks: self
                .tasks
                .forward
                .iter()
                .map(|(local, remote)| {
                    let meta = self.task_meta.get(local);
                    (
                        local.clone(),
                        StoredTask {
                            remote_id: remote.clone(),
                            list_id: meta.map(|m| m.list_id.clone()).unwrap_or_default(),
                            synced_at: meta.and_then(|m| m.synced_at),
                        },
                    )
                })
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        crate::storage::write_atomic(&self.path, &data)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn map_local_list(&self, local_id: &str) -> Option<&str> {
        self.lists.get(local_id)
    }

    pub fn map_remote_list(&self, remote_id: &str) -> Option<&str> {
        self.lists.get_inverse(remote_id)
    }

    pub fn set_list_mapping(&mut self, local_id: &str, remote_id: &str) {
        for (l, r) in self.lists.insert(local_id, remote_id) {
            self.list_synced.remove(&l);
            tracing::warn!(local = %l, remote = %r, "evicted stale list mapping");
        }
    }

    /// Remote `updated` observed when the list pair was last reconciled.
    pub fn list_synced_at(&self, local_id: &str) -> Option<DateTime<Utc>> {
        self.list_synced.get(local_id).copied()
    }

    /// Record the reconciled remote stamp of a bound list. Unbound ids are ignored.
    pub fn set_list_synced_at(&mut self, local_id: &str, synced_at: Option<DateTime<Utc>>) {
        match synced_at {
            Some(at) if self.lists.get(local_id).is_some() => {
                self.list_synced.insert(local_id.to_string(), at);
            }
            _ => {
                self.list_synced.remove(local_id);
            }
        }
    }

    /// Unbind a list together with every task mapping that belonged to it.
    pub fn remove_list_mapping(&mut self, local_id: &str) -> Option<String> {
        let orphaned: Vec<String> = self
            .task_meta
            .iter()
            .filter(|(_, meta)| meta.list_id == local_id)
            .map(|(task, _)| task.clone())
            .collect();
        for task in orphaned {
            self.remove_task_mapping(&task);
        }
        self.list_synced.remove(local_id);
        self.lists.remove(local_id)
    }

    pub fn map_local_task(&self, local_id: &str) -> Option<&str> {
        self.tasks.get(local_id)
    }

    pub fn map_remote_task(&self, remote_id: &str) -> Option<&str> {
        self.tasks.get_inverse(remote_id)
    }

    /// Remote `updated` observed when the pair was last reconciled.
    pub fn task_synced_at(&self, local_id: &str) -> Option<DateTime<Utc>> {
        self.task_meta.get(local_id).and_then(|m| m.synced_at)
    }

    /// Bind a task of local list `list_id` to `remote_id`.
    pub fn set_task_mapping(
        &mut self,
        list_id: &str,
        local_id: &str,
        remote_id: &str,
        synced_at: Option<DateTime<Utc>>,
    ) {
        for (l, r) in self.tasks.insert(local_id, remote_id) {
            if l != local_id {
                self.task_meta.remove(&l);
            }
            tracing::warn!(local = %l, remote = %r, "evicted stale task mapping");
        }
        self.task_meta.insert(
            local_id.to_string(),
            TaskMeta {
                list_id: list_id.to_string(),
                synced_at,
            },
        );
    }

    pub fn remove_task_mapping(&mut self, local_id: &str) -> Option<String> {
        self.task_meta.remove(local_id);
        self.tasks.remove(local_id)
    }

    /// All `(local, remote)` list pairs, sorted by local id.
    pub fn list_pairs(&self) -> Vec<(String, String)> {
        self.lists.sorted_pairs()
    }

    /// All `(local, remote)` task pairs, sorted by local id.
    pub fn task_pairs(&self) -> Vec<(String, String)> {
        self.tasks.sorted_pairs()
    }

    /// Task mappings that belong to local list `list_id`.
    pub fn tasks_in_list(&self, list_id: &str) -> Vec<TaskMapping> {
        let mut out: Vec<TaskMapping> = self
            .task_meta
            .iter()
            .filter(|(_, meta)| meta.list_id == list_id)
            .filter_map(|(local, meta)| {
                Some(TaskMapping {
                    local_id: local.clone(),
                    remote_id: self.tasks.get(local)?.to_string(),
                    synced_at: meta.synced_at,
                })
            })
            .collect();
        out.sort_by(|a, b| a.local_id.cmp(&b.local_id));
        out
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn apply(&mut self, change: MappingChange) {
        match change {
            MappingChange::BindList {
                local_id,
                remote_id,
            } => self.set_list_mapping(&local_id, &remote_id),
            MappingChange::UnbindList { local_id } => {
                self.remove_list_mapping(&local_id);
            }
            MappingChange::BindTask {
                list_id,
                local_id,
                remote_id,
                synced_at,
            } => self.set_task_mapping(&list_id, &local_id, &remote_id, synced_at),
            MappingChange::UnbindTask { local_id } => {
                self.remove_task_mapping(&local_id);
            }
        }
    }
}
