//! The local store collaborator and its in-memory implementation.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{LocalList, LocalTask};

/// Persistent home of local lists and tasks.
///
/// Implementations serialize their own mutations; callers may share one
/// store across tasks behind an `Arc`.
pub trait LocalStore: Send + Sync {
    /// All lists, in no particular order.
    fn lists(&self) -> Result<Vec<LocalList>, StoreError>;

    /// All tasks of `list_id`. Unknown lists yield an empty vector.
    fn tasks(&self, list_id: &str) -> Result<Vec<LocalTask>, StoreError>;

    /// Insert or replace a list by id.
    fn upsert_list(&self, list: LocalList) -> Result<(), StoreError>;

    /// Insert or replace a task by id. The owning list must exist.
    fn upsert_task(&self, task: LocalTask) -> Result<(), StoreError>;

    /// Delete a list and all of its tasks. Missing lists are ignored.
    fn delete_list(&self, id: &str) -> Result<(), StoreError>;

    /// Delete a task and its subtasks. Missing tasks are ignored.
    fn delete_task(&self, id: &str) -> Result<(), StoreError>;
}

/// Whole-store contents. Shared by the memory and JSON backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    pub lists: Vec<LocalList>,
    #[serde(default)]
    pub tasks: Vec<LocalTask>,
}

impl Snapshot {
    pub fn tasks_of(&self, list_id: &str) -> Vec<LocalTask> {
        self.tasks
            .iter()
            .filter(|t| t.list_id == list_id)
            .cloned()
            .collect()
    }

    pub fn upsert_list(&mut self, list: LocalList) {
        match self.lists.iter_mut().find(|l| l.id == list.id) {
            Some(existing) => *existing = list,
            None => self.lists.push(list),
        }
    }

    pub fn upsert_task(&mut self, task: LocalTask) -> Result<(), StoreError> {
        if !self.lists.iter().any(|l| l.id == task.list_id) {
            return Err(StoreError::NotFound {
                kind: "list",
                id: task.list_id,
            });
        }
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
        Ok(())
    }

    /// Returns whether anything was removed.
    pub fn delete_list(&mut self, id: &str) -> bool {
        let before = self.lists.len() + self.tasks.len();
        self.lists.retain(|l| l.id != id);
        self.tasks.retain(|t| t.list_id != id);
        before != self.lists.len() + self.tasks.len()
    }

    /// Removes `id` and every transitive subtask. Returns whether anything
    /// was removed.
    pub fn delete_task(&mut self, id: &str) -> bool {
        if !self.tasks.iter().any(|t| t.id == id) {
            return false;
        }
        let mut doomed: HashSet<String> = HashSet::from([id.to_string()]);
        loop {
            let grown: Vec<String> = self
                .tasks
                .iter()
                .filter(|t| !doomed.contains(&t.id))
                .filter(|t| t.parent_id.as_ref().is_some_and(|p| doomed.contains(p)))
                .map(|t| t.id.clone())
                .collect();
            if grown.is_empty() {
                break;
            }
            doomed.extend(grown);
        }
        self.tasks.retain(|t| !doomed.contains(&t.id));
        true
    }
}

/// Volatile store, used by tests and as the default when no file is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Snapshot>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Snapshot>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl LocalStore for MemoryStore {
    fn lists(&self) -> Result<Vec<LocalList>, StoreError> {
        Ok(self.read()?.lists.clone())
    }

    fn tasks(&self, list_id: &str) -> Result<Vec<LocalTask>, StoreError> {
        Ok(self.read()?.tasks_of(list_id))
    }

    fn upsert_list(&self, list: LocalList) -> Result<(), StoreError> {
        self.write()?.upsert_list(list);
        Ok(())
    }

    fn upsert_task(&self, task: LocalTask) -> Result<(), StoreError> {
        self.write()?.upsert_task(task)
    }

    fn delete_list(&self, id: &str) -> Result<(), StoreError> {
        self.write()?.delete_list(id);
        Ok(())
    }

    fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.write()?.delete_task(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let mut list = LocalList::new("Inbox");
        store.upsert_list(list.clone()).unwrap();
        list.title = "Renamed".into();
        store.upsert_list(list).unwrap();

        let lists = store.lists().unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].title, "Renamed");
    }

    #[test]
    fn task_requires_existing_list() {
        let store = MemoryStore::new();
        let err = store
            .upsert_task(LocalTask::new("missing", "Orphan"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "list", .. }));
    }

    #[test]
    fn deleting_list_deletes_its_tasks() {
        let store = MemoryStore::new();
        let a = LocalList::new("A");
        let b = LocalList::new("B");
        store.upsert_list(a.clone()).unwrap();
        store.upsert_list(b.clone()).unwrap();
        store.upsert_task(LocalTask::new(&a.id, "a1")).unwrap();
        store.upsert_task(LocalTask::new(&b.id, "b1")).unwrap();

        store.delete_list(&a.id).unwrap();

        assert!(store.tasks(&a.id).unwrap().is_empty());
        assert_eq!(store.tasks(&b.id).unwrap().len(), 1);
        assert_eq!(store.lists().unwrap().len(), 1);
    }

    #[test]
    fn deleting_task_cascades_to_subtasks() {
        let store = MemoryStore::new();
        let list = LocalList::new("A");
        store.upsert_list(list.clone()).unwrap();
        let parent = LocalTask::new(&list.id, "parent");
        let child = LocalTask::new(&list.id, "child").with_parent(&parent.id);
        let grandchild = LocalTask::new(&list.id, "grandchild").with_parent(&child.id);
        let sibling = LocalTask::new(&list.id, "sibling");
        for t in [&parent, &child, &grandchild, &sibling] {
            store.upsert_task(t.clone()).unwrap();
        }

        store.delete_task(&parent.id).unwrap();

        let left = store.tasks(&list.id).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, sibling.id);
    }

    #[test]
    fn deleting_missing_records_is_a_no_op() {
        let store = MemoryStore::new();
        store.delete_list("nope").unwrap();
        store.delete_task("nope").unwrap();
    }
}
