//! Shared fixtures: an in-memory imitation of the remote task service and a
//! fixed token source.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use tokio::sync::Notify;

use taskbridge_core::integrations::google_tasks::{ListTasksQuery, Page, TasksApi};
use taskbridge_core::sync::position;
use taskbridge_core::{RemoteList, RemoteTask, SyncError, TokenSource};

/// Failure injected into every call that touches one remote list.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    RateLimited,
    Server(u16),
    Unauthorized,
}

impl Fault {
    fn error(self) -> SyncError {
        match self {
            Fault::RateLimited => SyncError::RateLimited,
            Fault::Server(code) => SyncError::ServerError(code),
            Fault::Unauthorized => SyncError::AuthRequired,
        }
    }
}

#[derive(Default)]
struct State {
    clock: Option<DateTime<Utc>>,
    next_id: usize,
    lists: Vec<RemoteList>,
    tasks: HashMap<String, Vec<RemoteTask>>,
    faults: HashMap<String, Fault>,
    precondition_failures: usize,
    // Renames another client lands between our fetch and our update.
    racing_renames: HashMap<String, String>,
    calls: Vec<String>,
    page_size: usize,
}

/// Behaves like the real service where the reconciler can tell: server
/// assigned ids, etags, `updated` stamps, soft deletes and pagination.
pub struct FakeTasks {
    state: Mutex<State>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl Default for FakeTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTasks {
    pub fn new() -> Self {
        let start = Utc::now()
            .duration_trunc(Duration::milliseconds(1))
            .unwrap_or_else(|_| Utc::now());
        Self {
            state: Mutex::new(State {
                clock: Some(start),
                page_size: 100,
                ..Default::default()
            }),
            gate: Mutex::new(None),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().unwrap().page_size = page_size;
        self
    }

    /// Current server time, without advancing it.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().clock.unwrap_or_else(Utc::now)
    }

    /// Advance the server clock.
    pub fn advance(&self, by: Duration) {
        let mut s = self.state.lock().unwrap();
        s.clock = s.clock.map(|c| c + by);
    }

    pub fn fail_list(&self, remote_list_id: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(remote_list_id.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().unwrap().faults.clear();
    }

    /// The next `n` conditional PATCHes fail as if the etag were stale.
    pub fn fail_next_patches(&self, n: usize) {
        self.state.lock().unwrap().precondition_failures = n;
    }

    /// Block the next `list_tasks` call until the returned `release` is
    /// notified. `entered` fires once the call is parked.
    pub fn park_next_list_tasks(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn lists(&self) -> Vec<RemoteList> {
        self.state.lock().unwrap().lists.clone()
    }

    pub fn list_by_title(&self, title: &str) -> Option<RemoteList> {
        self.lists().into_iter().find(|l| l.title == title)
    }

    /// Live (not deleted) tasks of a remote list.
    pub fn tasks(&self, list_id: &str) -> Vec<RemoteTask> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(list_id)
            .map(|ts| ts.iter().filter(|t| !t.deleted).cloned().collect())
            .unwrap_or_default()
    }

    pub fn task_by_title(&self, list_id: &str, title: &str) -> Option<RemoteTask> {
        self.tasks(list_id).into_iter().find(|t| t.title == title)
    }

    /// Seed a list as if another client created it.
    pub fn seed_list(&self, title: &str) -> String {
        let mut s = self.state.lock().unwrap();
        let id = s.fresh_id("list");
        let updated = s.tick();
        s.lists.push(RemoteList {
            id: id.clone(),
            title: title.to_string(),
            updated: Some(updated),
            etag: Some(format!("\"{id}-{}\"", updated.timestamp_millis())),
        });
        s.tasks.insert(id.clone(), Vec::new());
        id
    }

    /// Seed a task as if another client created it.
    pub fn seed_task(&self, list_id: &str, title: &str, parent: Option<&str>) -> String {
        let mut s = self.state.lock().unwrap();
        let id = s.fresh_id("task");
        let updated = s.tick();
        let siblings = s
            .tasks
            .get(list_id)
            .map(|ts| ts.iter().filter(|t| t.parent.as_deref() == parent).count())
            .unwrap_or(0);
        let task = RemoteTask {
            id: id.clone(),
            title: title.to_string(),
            parent: parent.map(String::from),
            position: position::format(siblings as f64),
            updated: Some(updated),
            etag: Some(format!("\"{id}-{}\"", updated.timestamp_millis())),
            ..Default::default()
        };
        s.tasks.entry(list_id.to_string()).or_default().push(task);
        id
    }

    /// Edit a task as if another client did, stamping it with server time.
    pub fn edit_task(&self, list_id: &str, task_id: &str, edit: impl FnOnce(&mut RemoteTask)) {
        let mut s = self.state.lock().unwrap();
        let updated = s.tick();
        if let Some(task) = s
            .tasks
            .get_mut(list_id)
            .and_then(|ts| ts.iter_mut().find(|t| t.id == task_id))
        {
            edit(task);
            task.updated = Some(updated);
            task.etag = Some(format!("\"{task_id}-{}\"", updated.timestamp_millis()));
        }
    }

    pub fn rename_list(&self, list_id: &str, title: &str) {
        self.state.lock().unwrap().rename_list(list_id, title);
    }

    /// Rename `list_id` as another client would, just before the next
    /// `update_list` on it reaches the server.
    pub fn rename_list_before_next_update(&self, list_id: &str, title: &str) {
        self.state
            .lock()
            .unwrap()
            .racing_renames
            .insert(list_id.to_string(), title.to_string());
    }

    /// Delete as another client would (soft delete, subtasks included).
    pub fn remove_task(&self, list_id: &str, task_id: &str) {
        let mut s = self.state.lock().unwrap();
        let _ = s.soft_delete(list_id, task_id);
    }

    pub fn remove_list(&self, list_id: &str) {
        let mut s = self.state.lock().unwrap();
        s.lists.retain(|l| l.id != list_id);
        s.tasks.remove(list_id);
    }
}

impl State {
    fn fresh_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{}", self.next_id)
    }

    fn rename_list(&mut self, list_id: &str, title: &str) {
        let updated = self.tick();
        if let Some(list) = self.lists.iter_mut().find(|l| l.id == list_id) {
            list.title = title.to_string();
            list.updated = Some(updated);
            list.etag = Self::etag(list_id, updated);
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let next = self.clock.unwrap_or_else(Utc::now) + Duration::seconds(1);
        self.clock = Some(next);
        next
    }

    fn check(&mut self, call: String, list_id: Option<&str>) -> Result<(), SyncError> {
        self.calls.push(call);
        if let Some(fault) = list_id.and_then(|id| self.faults.get(id)) {
            return Err(fault.error());
        }
        Ok(())
    }

    fn etag(id: &str, at: DateTime<Utc>) -> Option<String> {
        Some(format!("\"{id}-{}\"", at.timestamp_millis()))
    }

    fn task_mut(&mut self, list_id: &str, task_id: &str) -> Result<&mut RemoteTask, SyncError> {
        self.tasks
            .get_mut(list_id)
            .and_then(|ts| ts.iter_mut().find(|t| t.id == task_id && !t.deleted))
            .ok_or(SyncError::NotFound)
    }

    fn soft_delete(&mut self, list_id: &str, task_id: &str) -> Result<(), SyncError> {
        let updated = self.tick();
        let tasks = self.tasks.get_mut(list_id).ok_or(SyncError::NotFound)?;
        if !tasks.iter().any(|t| t.id == task_id && !t.deleted) {
            return Err(SyncError::NotFound);
        }
        let mut doomed = vec![task_id.to_string()];
        while let Some(id) = doomed.pop() {
            for t in tasks.iter_mut() {
                if t.id == id && !t.deleted {
                    t.deleted = true;
                    t.updated = Some(updated);
                }
                if t.parent.as_deref() == Some(id.as_str()) && !t.deleted {
                    doomed.push(t.id.clone());
                }
            }
        }
        Ok(())
    }

    fn paginate<T: Clone>(&self, items: &[T], page_token: Option<&str>) -> Page<T> {
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        Page {
            items: items[start.min(end)..end].to_vec(),
            next_page_token: (end < items.len()).then(|| end.to_string()),
            rejected: 0,
        }
    }
}

#[async_trait]
impl TasksApi for FakeTasks {
    async fn list_lists(
        &self,
        _token: &str,
        page_token: Option<&str>,
    ) -> Result<Page<RemoteList>, SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check("list_lists".into(), None)?;
        let lists = s.lists.clone();
        Ok(s.paginate(&lists, page_token))
    }

    async fn create_list(&self, _token: &str, title: &str) -> Result<RemoteList, SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("create_list {title}"), None)?;
        let id = s.fresh_id("list");
        let updated = s.tick();
        let list = RemoteList {
            id: id.clone(),
            title: title.to_string(),
            updated: Some(updated),
            etag: State::etag(&id, updated),
        };
        s.lists.push(list.clone());
        s.tasks.insert(id, Vec::new());
        Ok(list)
    }

    async fn update_list(
        &self,
        _token: &str,
        list_id: &str,
        title: &str,
        if_match: Option<&str>,
    ) -> Result<RemoteList, SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("update_list {list_id}"), Some(list_id))?;
        if let Some(racing) = s.racing_renames.remove(list_id) {
            s.rename_list(list_id, &racing);
        }
        let updated = s.tick();
        let list = s
            .lists
            .iter_mut()
            .find(|l| l.id == list_id)
            .ok_or(SyncError::NotFound)?;
        if if_match.is_some() && if_match != list.etag.as_deref() {
            return Err(SyncError::PreconditionFailed);
        }
        list.title = title.to_string();
        list.updated = Some(updated);
        list.etag = State::etag(list_id, updated);
        Ok(list.clone())
    }

    async fn delete_list(&self, _token: &str, list_id: &str) -> Result<(), SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("delete_list {list_id}"), Some(list_id))?;
        let before = s.lists.len();
        s.lists.retain(|l| l.id != list_id);
        if s.lists.len() == before {
            return Err(SyncError::NotFound);
        }
        s.tasks.remove(list_id);
        Ok(())
    }

    async fn list_tasks(
        &self,
        _token: &str,
        list_id: &str,
        query: &ListTasksQuery,
    ) -> Result<Page<RemoteTask>, SyncError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        let mut s = self.state.lock().unwrap();
        s.check(format!("list_tasks {list_id}"), Some(list_id))?;
        let all = s.tasks.get(list_id).ok_or(SyncError::NotFound)?;
        let visible: Vec<RemoteTask> = all
            .iter()
            .filter(|t| query.show_deleted || !t.deleted)
            .filter(|t| query.show_completed || !t.is_completed())
            .filter(|t| query.updated_min.map_or(true, |min| t.updated >= Some(min)))
            .cloned()
            .collect();
        Ok(s.paginate(&visible, query.page_token.as_deref()))
    }

    async fn insert_task(
        &self,
        _token: &str,
        list_id: &str,
        task: &RemoteTask,
        parent: Option<&str>,
        previous: Option<&str>,
    ) -> Result<RemoteTask, SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("insert_task {}", task.title), Some(list_id))?;
        if let Some(p) = parent {
            s.task_mut(list_id, p)
                .map_err(|_| SyncError::InvalidResponse(format!("unknown parent {p}")))?;
        }
        let id = s.fresh_id("task");
        let updated = s.tick();
        let siblings = s
            .tasks
            .get(list_id)
            .ok_or(SyncError::NotFound)?
            .iter()
            .filter(|t| !t.deleted && t.parent.as_deref() == parent)
            .count();
        let slot = match previous {
            Some(prev) => position::parse(&s.task_mut(list_id, prev)?.position) + 1.0,
            None => siblings as f64,
        };
        let created = RemoteTask {
            id: id.clone(),
            title: task.title.clone(),
            notes: task.notes.clone(),
            due: task.due,
            status: task.status,
            parent: parent.map(String::from),
            position: position::format(slot),
            updated: Some(updated),
            deleted: false,
            etag: State::etag(&id, updated),
        };
        s.tasks
            .entry(list_id.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_task(
        &self,
        _token: &str,
        list_id: &str,
        task_id: &str,
        task: &RemoteTask,
        if_match: Option<&str>,
    ) -> Result<RemoteTask, SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("update_task {task_id}"), Some(list_id))?;
        if s.precondition_failures > 0 {
            s.precondition_failures -= 1;
            return Err(SyncError::PreconditionFailed);
        }
        let updated = s.tick();
        let existing = s.task_mut(list_id, task_id)?;
        if if_match.is_some() && if_match != existing.etag.as_deref() {
            return Err(SyncError::PreconditionFailed);
        }
        existing.title = task.title.clone();
        existing.notes = task.notes.clone();
        existing.due = task.due;
        existing.status = task.status;
        existing.updated = Some(updated);
        existing.etag = State::etag(task_id, updated);
        Ok(existing.clone())
    }

    async fn move_task(
        &self,
        _token: &str,
        list_id: &str,
        task_id: &str,
        parent: Option<&str>,
        _previous: Option<&str>,
    ) -> Result<RemoteTask, SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("move_task {task_id}"), Some(list_id))?;
        let updated = s.tick();
        let existing = s.task_mut(list_id, task_id)?;
        existing.parent = parent.map(String::from);
        existing.updated = Some(updated);
        existing.etag = State::etag(task_id, updated);
        Ok(existing.clone())
    }

    async fn delete_task(
        &self,
        _token: &str,
        list_id: &str,
        task_id: &str,
    ) -> Result<(), SyncError> {
        let mut s = self.state.lock().unwrap();
        s.check(format!("delete_task {task_id}"), Some(list_id))?;
        s.soft_delete(list_id, task_id)
    }
}

/// Token source that never refreshes.
pub struct StaticToken {
    signed_in: Mutex<bool>,
}

impl StaticToken {
    pub fn signed_in() -> Self {
        Self {
            signed_in: Mutex::new(true),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            signed_in: Mutex::new(false),
        }
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn current_token(&self) -> Result<String, SyncError> {
        if *self.signed_in.lock().unwrap() {
            Ok("test-token".into())
        } else {
            Err(SyncError::AuthRequired)
        }
    }
}
