//! One reconciliation pass.
//!
//! The list phase runs on the calling task. The task phase fans out one
//! worker per mapped list on a [`JoinSet`], bounded by
//! `max_concurrent_lists`. Workers never see the [`IdentityMapper`]: they get
//! a copy of their list's task mappings and hand back [`MappingChange`]s,
//! which the coordinator applies in completion order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conflict::{decide_merge, titles_differ, MergeDecision};
use super::mapping::{IdentityMapper, MappingChange, TaskMapping};
use super::position;
use super::types::{RemoteList, RemoteTask, SyncError, SyncReport, SyncStats, SyncStatus, TaskStatus};
use crate::integrations::auth::TokenSource;
use crate::integrations::google_tasks::{
    fetch_all_lists, fetch_all_tasks, ListTasksQuery, TasksApi, DEFAULT_MAX_PAGES,
};
use crate::error::StoreError;
use crate::models::{LocalList, LocalTask};
use crate::storage::{LocalStore, SyncConfig};

/// Tuning knobs for a pass.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub max_concurrent_lists: usize,
    pub max_pages: usize,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_lists: 4,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl From<&SyncConfig> for ReconcilerOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            max_concurrent_lists: cfg.max_concurrent_lists.max(1),
            max_pages: cfg.max_pages.max(1),
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Finished(SyncReport),
    /// Stopped at a cancellation checkpoint. Mapping changes made so far are
    /// persisted; no terminal status is owed.
    Cancelled(SyncStats),
}

pub struct Reconciler {
    api: Arc<dyn TasksApi>,
    tokens: Arc<dyn TokenSource>,
    store: Arc<dyn LocalStore>,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn TasksApi>,
        tokens: Arc<dyn TokenSource>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            api,
            tokens,
            store,
            options: ReconcilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one pass against `mapper`, persisting it before returning.
    pub async fn run_pass(
        &self,
        mapper: &mut IdentityMapper,
        cancel: &CancellationToken,
    ) -> PassOutcome {
        let mut stats = SyncStats::default();

        let token = match self.tokens.current_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "sync pass needs sign-in");
                return PassOutcome::Finished(SyncReport {
                    status: SyncStatus::Error(e.to_string()),
                    stats,
                });
            }
        };

        info!("sync pass started");
        let mut failure = self.list_phase(&token, mapper, &mut stats).await.err();

        if failure.is_none() && !cancel.is_cancelled() {
            failure = self
                .task_phase(&token, mapper, &mut stats, cancel)
                .await
                .err();
        }

        // Remote records created above must never be orphaned.
        if let Err(e) = mapper.persist() {
            warn!(error = %e, path = %mapper.path().display(), "failed to persist mappings");
            failure.get_or_insert(e);
        }

        if cancel.is_cancelled() {
            info!(?stats, "sync pass cancelled");
            return PassOutcome::Cancelled(stats);
        }

        let status = match failure {
            None => {
                info!(
                    lists_downloaded = stats.lists_downloaded,
                    lists_uploaded = stats.lists_uploaded,
                    tasks_downloaded = stats.tasks_downloaded,
                    tasks_uploaded = stats.tasks_uploaded,
                    conflicts = stats.conflicts,
                    errors = stats.errors,
                    "sync pass finished"
                );
                SyncStatus::Success(Utc::now())
            }
            Some(e) => {
                warn!(error = %e, ?stats, "sync pass aborted");
                SyncStatus::Error(e.to_string())
            }
        };
        PassOutcome::Finished(SyncReport { status, stats })
    }

    async fn list_phase(
        &self,
        token: &str,
        mapper: &mut IdentityMapper,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        let remote = fetch_all_lists(self.api.as_ref(), token, self.options.max_pages).await?;
        stats.errors += remote.rejected;

        let remote_lists: Vec<&RemoteList> =
            remote.items.iter().filter(|l| !l.id.is_empty()).collect();
        let remote_by_id: HashMap<&str, &RemoteList> =
            remote_lists.iter().map(|l| (l.id.as_str(), *l)).collect();
        let mut locals: HashMap<String, LocalList> = on_store(&self.store, |s| s.lists())
            .await?
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();

        // Gone remotely. Only trustworthy when every page was seen.
        if !remote.truncated {
            for (local_id, remote_id) in mapper.list_pairs() {
                if remote_by_id.contains_key(remote_id.as_str()) {
                    continue;
                }
                if locals.remove(&local_id).is_some() {
                    let id = local_id.clone();
                    on_store(&self.store, move |s| s.delete_list(&id)).await?;
                    stats.lists_downloaded += 1;
                    info!(local = %local_id, remote = %remote_id, "list deleted remotely");
                }
                mapper.remove_list_mapping(&local_id);
            }
        }

        // Mapped lists whose local title goes up in the second sweep.
        let mut uploads: HashSet<String> = HashSet::new();

        for remote_list in &remote_lists {
            match mapper.map_remote_list(&remote_list.id).map(str::to_owned) {
                Some(local_id) => {
                    // Missing locally means deleted locally; handled below.
                    let Some(local) = locals.get_mut(&local_id) else {
                        continue;
                    };
                    if !titles_differ(&local.title, &remote_list.title) {
                        mapper.set_list_synced_at(&local_id, remote_list.updated);
                        continue;
                    }
                    let synced = mapper.list_synced_at(&local_id);
                    match decide_merge(local.updated_at, remote_list.updated, synced) {
                        MergeDecision::UseRemote => {
                            local.title = remote_list.title.clone();
                            if let Some(updated) = remote_list.updated {
                                local.updated_at = updated;
                            }
                            let list = local.clone();
                            on_store(&self.store, move |s| s.upsert_list(list)).await?;
                            mapper.set_list_synced_at(&local_id, remote_list.updated);
                            stats.lists_downloaded += 1;
                            debug!(local = %local_id, "list title downloaded");
                        }
                        MergeDecision::Conflict => {
                            stats.conflicts += 1;
                            info!(local = %local_id, remote = %remote_list.id, "list renamed on both sides; keeping local");
                            uploads.insert(local_id);
                        }
                        MergeDecision::UseLocal => {
                            uploads.insert(local_id);
                        }
                        MergeDecision::Unchanged => {}
                    }
                }
                None => {
                    let mut list = LocalList::new(remote_list.title.clone());
                    list.position = locals.len() as f64;
                    if let Some(updated) = remote_list.updated {
                        list.updated_at = updated;
                    }
                    let created = list.clone();
                    on_store(&self.store, move |s| s.upsert_list(created)).await?;
                    mapper.set_list_mapping(&list.id, &remote_list.id);
                    mapper.set_list_synced_at(&list.id, remote_list.updated);
                    stats.lists_downloaded += 1;
                    debug!(local = %list.id, remote = %remote_list.id, "list created locally");
                    locals.insert(list.id.clone(), list);
                }
            }
        }

        let mut ordered: Vec<LocalList> = locals.values().cloned().collect();
        ordered.sort_by(|a, b| a.position.total_cmp(&b.position).then_with(|| a.id.cmp(&b.id)));

        for mut local in ordered {
            match mapper.map_local_list(&local.id).map(str::to_owned) {
                Some(remote_id) => {
                    if !uploads.contains(&local.id) {
                        continue;
                    }
                    let Some(remote_list) = remote_by_id.get(remote_id.as_str()) else {
                        continue;
                    };
                    // A stale ETag leaves the stamp alone, so next pass sees
                    // both sides changed and pushes again.
                    let result = self
                        .api
                        .update_list(token, &remote_id, &local.title, remote_list.etag.as_deref())
                        .await;
                    match result {
                        Ok(updated) => {
                            stats.lists_uploaded += 1;
                            debug!(local = %local.id, "list title uploaded");
                            mapper.set_list_synced_at(&local.id, updated.updated);
                            if let Some(stamp) = updated.updated {
                                local.updated_at = stamp;
                                on_store(&self.store, move |s| s.upsert_list(local)).await?;
                            }
                        }
                        Err(e) => absorb(e, stats, "list update", &local.id)?,
                    }
                }
                None => match self.api.create_list(token, &local.title).await {
                    Ok(created) if !created.id.is_empty() => {
                        mapper.set_list_mapping(&local.id, &created.id);
                        mapper.set_list_synced_at(&local.id, created.updated);
                        stats.lists_uploaded += 1;
                        debug!(local = %local.id, remote = %created.id, "list created remotely");
                    }
                    Ok(_) => absorb(
                        SyncError::InvalidResponse("created list has no id".into()),
                        stats,
                        "list create",
                        &local.id,
                    )?,
                    Err(e) => absorb(e, stats, "list create", &local.id)?,
                },
            }
        }

        // Gone locally.
        for (local_id, remote_id) in mapper.list_pairs() {
            if locals.contains_key(&local_id) {
                continue;
            }
            match self.api.delete_list(token, &remote_id).await {
                Ok(()) => {
                    stats.lists_uploaded += 1;
                    mapper.remove_list_mapping(&local_id);
                    info!(local = %local_id, remote = %remote_id, "list deleted remotely after local delete");
                }
                Err(SyncError::NotFound) => {
                    mapper.remove_list_mapping(&local_id);
                }
                Err(e) => absorb(e, stats, "list delete", &local_id)?,
            }
        }

        Ok(())
    }

    async fn task_phase(
        &self,
        token: &str,
        mapper: &mut IdentityMapper,
        stats: &mut SyncStats,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let limit = self.options.max_concurrent_lists.max(1);
        let mut pending = mapper.list_pairs().into_iter();
        let mut workers: JoinSet<ListOutcome> = JoinSet::new();
        let mut failure: Option<SyncError> = None;

        loop {
            while failure.is_none() && workers.len() < limit && !cancel.is_cancelled() {
                let Some((local_list, remote_list)) = pending.next() else {
                    break;
                };
                let job = ListJob {
                    api: self.api.clone(),
                    store: self.store.clone(),
                    token: token.to_string(),
                    mappings: mapper.tasks_in_list(&local_list),
                    local_list,
                    remote_list,
                    max_pages: self.options.max_pages,
                };
                workers.spawn(job.run());
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            match joined {
                Ok(outcome) => {
                    for change in outcome.changes {
                        mapper.apply(change);
                    }
                    *stats += outcome.stats;
                    if let Some(e) = outcome.failure {
                        warn!(error = %e, "stopping task phase");
                        failure.get_or_insert(e);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "list worker did not finish");
                    stats.errors += 1;
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Count a record-scoped failure, or hand a pass-fatal one back.
fn absorb(err: SyncError, stats: &mut SyncStats, what: &str, id: &str) -> Result<(), SyncError> {
    if err.is_pass_fatal() {
        return Err(err);
    }
    warn!(record = %id, error = %err, "{what} failed");
    stats.errors += 1;
    Ok(())
}

/// Run a store call on the blocking pool. File-backed stores rewrite their
/// snapshot on every mutation.
async fn on_store<T, F>(store: &Arc<dyn LocalStore>, op: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce(&dyn LocalStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    let joined = tokio::task::spawn_blocking(move || op(store.as_ref())).await;
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(SyncError::Io(std::io::Error::other(format!(
            "local store call did not finish: {e}"
        )))),
    }
}

/// Result of one list's task phase.
#[derive(Debug, Default)]
struct ListOutcome {
    changes: Vec<MappingChange>,
    stats: SyncStats,
    failure: Option<SyncError>,
}

/// A worker's private view of its list's task mappings.
struct ListScope {
    list_id: String,
    forward: HashMap<String, (String, Option<DateTime<Utc>>)>,
    inverse: HashMap<String, String>,
    changes: Vec<MappingChange>,
}

impl ListScope {
    fn new(list_id: &str, mappings: Vec<TaskMapping>) -> Self {
        let mut scope = Self {
            list_id: list_id.to_string(),
            forward: HashMap::new(),
            inverse: HashMap::new(),
            changes: Vec::new(),
        };
        for m in mappings {
            scope.inverse.insert(m.remote_id.clone(), m.local_id.clone());
            scope.forward.insert(m.local_id, (m.remote_id, m.synced_at));
        }
        scope
    }

    fn remote_of(&self, local_id: &str) -> Option<String> {
        self.forward.get(local_id).map(|(r, _)| r.clone())
    }

    fn local_of(&self, remote_id: &str) -> Option<String> {
        self.inverse.get(remote_id).cloned()
    }

    fn synced(&self, local_id: &str) -> Option<DateTime<Utc>> {
        self.forward.get(local_id).and_then(|(_, s)| *s)
    }

    fn mapped(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .forward
            .iter()
            .map(|(l, (r, _))| (l.clone(), r.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    fn bind(&mut self, local_id: &str, remote_id: &str, synced_at: Option<DateTime<Utc>>) {
        if self.forward.get(local_id) == Some(&(remote_id.to_string(), synced_at)) {
            return;
        }
        if let Some((old_remote, _)) = self.forward.remove(local_id) {
            self.inverse.remove(&old_remote);
        }
        if let Some(old_local) = self.inverse.remove(remote_id) {
            self.forward.remove(&old_local);
        }
        self.forward
            .insert(local_id.to_string(), (remote_id.to_string(), synced_at));
        self.inverse
            .insert(remote_id.to_string(), local_id.to_string());
        self.changes.push(MappingChange::BindTask {
            list_id: self.list_id.clone(),
            local_id: local_id.to_string(),
            remote_id: remote_id.to_string(),
            synced_at,
        });
    }

    fn unbind(&mut self, local_id: &str) {
        if let Some((remote, _)) = self.forward.remove(local_id) {
            self.inverse.remove(&remote);
            self.changes.push(MappingChange::UnbindTask {
                local_id: local_id.to_string(),
            });
        }
    }
}

/// Everything a list worker needs, owned so it can run on its own task.
struct ListJob {
    api: Arc<dyn TasksApi>,
    store: Arc<dyn LocalStore>,
    token: String,
    mappings: Vec<TaskMapping>,
    local_list: String,
    remote_list: String,
    max_pages: usize,
}

impl ListJob {
    async fn run(self) -> ListOutcome {
        let mut scope = ListScope::new(&self.local_list, self.mappings.clone());
        let mut stats = SyncStats::default();
        let failure = self.reconcile(&mut scope, &mut stats).await.err();
        ListOutcome {
            changes: scope.changes,
            stats,
            failure,
        }
    }

    /// Returns `Err` only for pass-fatal failures.
    async fn reconcile(&self, scope: &mut ListScope, stats: &mut SyncStats) -> Result<(), SyncError> {
        let list = self.local_list.as_str();
        let remote = match fetch_all_tasks(
            self.api.as_ref(),
            &self.token,
            &self.remote_list,
            &ListTasksQuery::live(),
            self.max_pages,
        )
        .await
        {
            Ok(remote) => remote,
            Err(e) if e.is_pass_fatal() => return Err(e),
            Err(e) => {
                warn!(list, error = %e, "could not fetch tasks; skipping list this pass");
                stats.errors += 1;
                return Ok(());
            }
        };
        stats.errors += remote.rejected;

        let remote_by_id: HashMap<String, RemoteTask> = remote
            .items
            .into_iter()
            .filter(|t| !t.deleted && !t.id.is_empty())
            .map(|t| (t.id.clone(), t))
            .collect();
        let list_id = list.to_string();
        let mut locals: HashMap<String, LocalTask> = on_store(&self.store, move |s| s.tasks(&list_id))
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let present_at_start: HashSet<String> = locals.keys().cloned().collect();

        // Gone remotely.
        if !remote.truncated {
            for (local_id, remote_id) in scope.mapped() {
                if remote_by_id.contains_key(&remote_id) {
                    continue;
                }
                if locals.contains_key(&local_id) {
                    let id = local_id.clone();
                    on_store(&self.store, move |s| s.delete_task(&id)).await?;
                    remove_subtree(&mut locals, &local_id);
                    stats.tasks_downloaded += 1;
                    info!(list, local = %local_id, remote = %remote_id, "task deleted remotely");
                }
                scope.unbind(&local_id);
            }
        }

        // Subtasks swept away by a cascade above come back as fresh downloads.
        for (local_id, _) in scope.mapped() {
            if present_at_start.contains(&local_id) && !locals.contains_key(&local_id) {
                scope.unbind(&local_id);
            }
        }

        let mut pushes: Vec<(String, RemoteTask)> = Vec::new();
        let mut remote_order: Vec<&RemoteTask> = remote_by_id.values().collect();
        remote_order.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        let remote_order = parents_first(remote_order, |t| t.id.clone(), |t| t.parent.clone());

        for remote_task in remote_order {
            let parent_local = remote_task
                .parent
                .as_deref()
                .and_then(|p| scope.local_of(p));

            let Some(local_id) = scope.local_of(&remote_task.id) else {
                let mut task = LocalTask::new(list, remote_task.title.clone());
                apply_remote(&mut task, remote_task, parent_local);
                if remote_task.updated.is_none() {
                    task.updated_at = Utc::now();
                }
                let created = task.clone();
                on_store(&self.store, move |s| s.upsert_task(created)).await?;
                scope.bind(&task.id, &remote_task.id, remote_task.updated);
                stats.tasks_downloaded += 1;
                debug!(list, local = %task.id, remote = %remote_task.id, "task created locally");
                locals.insert(task.id.clone(), task);
                continue;
            };

            // Deleted locally; the remote delete happens last.
            let Some(local) = locals.get_mut(&local_id) else {
                continue;
            };

            match decide_merge(local.updated_at, remote_task.updated, scope.synced(&local_id)) {
                MergeDecision::Conflict => {
                    stats.conflicts += 1;
                    info!(list, local = %local_id, remote = %remote_task.id, "edited on both sides; keeping local");
                    pushes.push((local_id, remote_task.clone()));
                }
                MergeDecision::UseLocal => pushes.push((local_id, remote_task.clone())),
                MergeDecision::UseRemote => {
                    if differs_for_download(local, remote_task, parent_local.as_deref()) {
                        apply_remote(local, remote_task, parent_local);
                        let downloaded = local.clone();
                        on_store(&self.store, move |s| s.upsert_task(downloaded)).await?;
                        stats.tasks_downloaded += 1;
                        debug!(list, local = %local_id, "task downloaded");
                    }
                    scope.bind(&local_id, &remote_task.id, remote_task.updated);
                }
                MergeDecision::Unchanged => {
                    scope.bind(&local_id, &remote_task.id, remote_task.updated);
                }
            }
        }

        for (local_id, remote_task) in pushes {
            self.push_existing(scope, stats, &mut locals, &local_id, &remote_task)
                .await?;
        }

        self.insert_unmapped(scope, stats, &mut locals).await?;

        // Gone locally.
        for (local_id, remote_id) in scope.mapped() {
            if locals.contains_key(&local_id) {
                continue;
            }
            match self.api.delete_task(&self.token, &self.remote_list, &remote_id).await {
                Ok(()) => {
                    stats.tasks_uploaded += 1;
                    scope.unbind(&local_id);
                    info!(list, local = %local_id, remote = %remote_id, "task deleted remotely after local delete");
                }
                // A parent's delete takes its subtasks with it.
                Err(SyncError::NotFound) => scope.unbind(&local_id),
                Err(e) => absorb(e, stats, "task delete", &local_id)?,
            }
        }

        Ok(())
    }

    /// Send a mapped local task that won the merge. A winner is always
    /// pushed: a reparent travels as a move, everything else as a PATCH.
    async fn push_existing(
        &self,
        scope: &mut ListScope,
        stats: &mut SyncStats,
        locals: &mut HashMap<String, LocalTask>,
        local_id: &str,
        remote_task: &RemoteTask,
    ) -> Result<(), SyncError> {
        let Some(local) = locals.get(local_id).cloned() else {
            return Ok(());
        };
        let wanted_parent = local
            .parent_id
            .as_deref()
            .and_then(|p| scope.remote_of(p));

        let mut etag = remote_task.etag.clone();
        let mut latest: Option<RemoteTask> = None;

        let reparent = wanted_parent != remote_task.parent;
        if reparent {
            match self
                .api
                .move_task(
                    &self.token,
                    &self.remote_list,
                    &remote_task.id,
                    wanted_parent.as_deref(),
                    None,
                )
                .await
            {
                Ok(moved) => {
                    etag = moved.etag.clone().or(etag);
                    latest = Some(moved);
                }
                Err(e) => return absorb(e, stats, "task move", local_id),
            }
        }

        if !reparent || differs_for_upload(&local, remote_task) {
            let body = remote_body(&local, Some(&remote_task.id));
            match self
                .api
                .update_task(
                    &self.token,
                    &self.remote_list,
                    &remote_task.id,
                    &body,
                    etag.as_deref(),
                )
                .await
            {
                Ok(updated) => latest = Some(updated),
                Err(e) => return absorb(e, stats, "task update", local_id),
            }
        }

        let synced = latest
            .as_ref()
            .and_then(|t| t.updated)
            .or(remote_task.updated);
        if let Some(latest) = latest {
            stats.tasks_uploaded += 1;
            debug!(list = %self.local_list, local = %local_id, "task uploaded");
            self.adopt_server_state(locals, local_id, &latest).await?;
        }
        scope.bind(local_id, &remote_task.id, synced);
        Ok(())
    }

    /// Create remote counterparts for unmapped local tasks, parents first.
    async fn insert_unmapped(
        &self,
        scope: &mut ListScope,
        stats: &mut SyncStats,
        locals: &mut HashMap<String, LocalTask>,
    ) -> Result<(), SyncError> {
        let mut unmapped: Vec<LocalTask> = locals
            .values()
            .filter(|t| scope.remote_of(&t.id).is_none())
            .cloned()
            .collect();
        unmapped.sort_by(|a, b| a.position.total_cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        let unmapped = parents_first(unmapped, |t| t.id.clone(), |t| t.parent_id.clone());

        for local in unmapped {
            let parent_remote = match local.parent_id.as_deref() {
                Some(parent) if locals.contains_key(parent) => match scope.remote_of(parent) {
                    Some(remote) => Some(remote),
                    None => {
                        debug!(local = %local.id, "parent not on remote yet; retrying next pass");
                        continue;
                    }
                },
                _ => None,
            };
            let previous = previous_sibling(locals, &local, scope);
            let body = remote_body(&local, None);

            match self
                .api
                .insert_task(
                    &self.token,
                    &self.remote_list,
                    &body,
                    parent_remote.as_deref(),
                    previous.as_deref(),
                )
                .await
            {
                Ok(created) if !created.id.is_empty() => {
                    scope.bind(&local.id, &created.id, created.updated);
                    stats.tasks_uploaded += 1;
                    debug!(local = %local.id, remote = %created.id, "task created remotely");
                    self.adopt_server_state(locals, &local.id, &created).await?;
                }
                Ok(_) => absorb(
                    SyncError::InvalidResponse("created task has no id".into()),
                    stats,
                    "task insert",
                    &local.id,
                )?,
                Err(e) => absorb(e, stats, "task insert", &local.id)?,
            }
        }
        Ok(())
    }

    /// After a push the server owns sibling order and the record's stamp.
    /// Taking its `updated` keeps the next pass quiet even when the local
    /// clock runs ahead.
    async fn adopt_server_state(
        &self,
        locals: &mut HashMap<String, LocalTask>,
        local_id: &str,
        remote_task: &RemoteTask,
    ) -> Result<(), SyncError> {
        let Some(local) = locals.get_mut(local_id) else {
            return Ok(());
        };
        let mut changed = false;
        if !remote_task.position.is_empty() {
            let pos = position::parse(&remote_task.position);
            if local.position != pos {
                local.position = pos;
                changed = true;
            }
        }
        if let Some(updated) = remote_task.updated {
            if local.updated_at != updated {
                local.updated_at = updated;
                changed = true;
            }
        }
        if changed {
            let adopted = local.clone();
            on_store(&self.store, move |s| s.upsert_task(adopted)).await?;
        }
        Ok(())
    }
}

fn notes_of(remote: &RemoteTask) -> &str {
    remote.notes.as_deref().unwrap_or_default()
}

fn differs_for_upload(local: &LocalTask, remote: &RemoteTask) -> bool {
    local.title != remote.title
        || local.notes != notes_of(remote)
        || local.due != remote.due
        || local.completed != remote.is_completed()
}

fn differs_for_download(local: &LocalTask, remote: &RemoteTask, parent_local: Option<&str>) -> bool {
    differs_for_upload(local, remote)
        || local.parent_id.as_deref() != parent_local
        || local.position != position::parse(&remote.position)
}

fn apply_remote(local: &mut LocalTask, remote: &RemoteTask, parent_local: Option<String>) {
    local.title = remote.title.clone();
    local.notes = notes_of(remote).to_string();
    local.due = remote.due;
    local.completed = remote.is_completed();
    local.parent_id = parent_local;
    local.position = position::parse(&remote.position);
    if let Some(updated) = remote.updated {
        local.updated_at = updated;
    }
}

fn remote_body(local: &LocalTask, remote_id: Option<&str>) -> RemoteTask {
    RemoteTask {
        id: remote_id.unwrap_or_default().to_string(),
        title: local.title.clone(),
        notes: (!local.notes.is_empty()).then(|| local.notes.clone()),
        due: local.due,
        status: if local.completed {
            TaskStatus::Completed
        } else {
            TaskStatus::NeedsAction
        },
        position: position::format(local.position),
        ..Default::default()
    }
}

/// Closest mapped sibling ordered before `task`.
fn previous_sibling(
    locals: &HashMap<String, LocalTask>,
    task: &LocalTask,
    scope: &ListScope,
) -> Option<String> {
    locals
        .values()
        .filter(|t| t.id != task.id && t.parent_id == task.parent_id && t.position < task.position)
        .filter_map(|t| scope.remote_of(&t.id).map(|r| (t.position, r)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, remote)| remote)
}

/// Remove `root` and its transitive subtasks from `tasks`.
fn remove_subtree(tasks: &mut HashMap<String, LocalTask>, root: &str) {
    let mut doomed: HashSet<String> = HashSet::from([root.to_string()]);
    loop {
        let grown: Vec<String> = tasks
            .values()
            .filter(|t| !doomed.contains(&t.id))
            .filter(|t| t.parent_id.as_ref().is_some_and(|p| doomed.contains(p)))
            .map(|t| t.id.clone())
            .collect();
        if grown.is_empty() {
            break;
        }
        doomed.extend(grown);
    }
    tasks.retain(|id, _| !doomed.contains(id));
}

/// Stable reorder so every item comes after its parent (when the parent is
/// in the same batch). Cycles are cut off at the batch size.
pub(crate) fn parents_first<T>(
    items: Vec<T>,
    id: impl Fn(&T) -> String,
    parent: impl Fn(&T) -> Option<String>,
) -> Vec<T> {
    let parents: HashMap<String, Option<String>> =
        items.iter().map(|t| (id(t), parent(t))).collect();
    let depth = |start: &str| -> usize {
        let mut depth = 0;
        let mut current = parents.get(start).cloned().flatten();
        while let Some(p) = current {
            if depth > parents.len() || !parents.contains_key(&p) {
                break;
            }
            depth += 1;
            current = parents.get(&p).cloned().flatten();
        }
        depth
    };
    let mut keyed: Vec<(usize, T)> = items.into_iter().map(|t| (depth(&id(&t)), t)).collect();
    keyed.sort_by_key(|(d, _)| *d);
    keyed.into_iter().map(|(_, t)| t).collect()
}
