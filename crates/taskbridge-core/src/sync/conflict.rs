//! Last-writer-wins decisions for a record present on both sides.

use chrono::{DateTime, Utc};

/// What to do with a mapped pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Local is strictly newer: push it.
    UseLocal,
    /// Remote is strictly newer: pull it.
    UseRemote,
    /// Same timestamp. Local is kept and nothing is pushed.
    Unchanged,
    /// Both sides changed since the last reconcile. Local is kept and pushed.
    Conflict,
}

impl MergeDecision {
    /// Whether the local record should be sent to the remote side.
    pub fn pushes_local(self) -> bool {
        matches!(self, MergeDecision::UseLocal | MergeDecision::Conflict)
    }
}

/// Decide between a local and a remote version of the same record.
///
/// A missing remote timestamp counts as the earliest possible instant.
/// `synced_at` is the remote timestamp recorded when the pair was last
/// reconciled; without it no conflict can be detected.
pub fn decide_merge(
    local_updated: DateTime<Utc>,
    remote_updated: Option<DateTime<Utc>>,
    synced_at: Option<DateTime<Utc>>,
) -> MergeDecision {
    if let (Some(synced), Some(remote)) = (synced_at, remote_updated) {
        if local_updated > synced && remote > synced {
            return MergeDecision::Conflict;
        }
    }

    match remote_updated {
        None => MergeDecision::UseLocal,
        Some(remote) if local_updated > remote => MergeDecision::UseLocal,
        Some(remote) if remote > local_updated => MergeDecision::UseRemote,
        Some(_) => MergeDecision::Unchanged,
    }
}

/// Titles that differ only in surrounding whitespace are the same title.
pub fn titles_differ(a: &str, b: &str) -> bool {
    a.trim() != b.trim()
}
