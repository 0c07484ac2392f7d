//! Core types for task synchronization.

use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, StoreError};

/// Timestamp encoding used for every timestamp on the wire:
/// RFC 3339, millisecond precision, `Z` suffix.
pub mod wire_time {
    use chrono::{DateTime, SecondsFormat, Utc};

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    }

    /// Serde adapter for `Option<DateTime<Utc>>` fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_str(&super::format(dt)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// A task list as the remote service represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteList {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, with = "wire_time::option", skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Completion state of a remote task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    #[default]
    NeedsAction,
    Completed,
}

/// A task as the remote service represents it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Serialized as `null` when absent so a PATCH clears the remote value.
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, with = "wire_time::option")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Read-only on the remote side; hierarchy changes go through `move`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Lexicographic ordering token.
    #[serde(default)]
    pub position: String,
    #[serde(default, with = "wire_time::option", skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl RemoteTask {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Counters accumulated over one pass. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub lists_downloaded: usize,
    pub lists_uploaded: usize,
    pub tasks_downloaded: usize,
    pub tasks_uploaded: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl SyncStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for SyncStats {
    type Output = SyncStats;

    fn add(mut self, rhs: SyncStats) -> SyncStats {
        self += rhs;
        self
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, rhs: SyncStats) {
        self.lists_downloaded += rhs.lists_downloaded;
        self.lists_uploaded += rhs.lists_uploaded;
        self.tasks_downloaded += rhs.tasks_downloaded;
        self.tasks_uploaded += rhs.tasks_uploaded;
        self.conflicts += rhs.conflicts;
        self.errors += rhs.errors;
    }
}

/// Process-wide sync status, published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success(DateTime<Utc>),
    Error(String),
}

impl SyncStatus {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}

/// Terminal result of one pass: status plus whatever stats were gathered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub stats: SyncStats,
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("OAuth state mismatch")]
    InvalidState,

    #[error("Invalid OAuth callback: {0}")]
    InvalidCallback(String),

    #[error("Rate limited by remote service")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(u16),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Remote record changed since it was fetched")]
    PreconditionFailed,

    #[error("Remote record not found")]
    NotFound,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync pass cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Errors that end the whole pass rather than a single record or list.
    pub fn is_pass_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthRequired
                | SyncError::RateLimited
                | SyncError::Store(_)
                | SyncError::Cancelled
                | SyncError::Io(_)
        )
    }

    /// Errors confined to one record: counted, then the pass moves on.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::ServerError(_)
                | SyncError::InvalidResponse(_)
                | SyncError::PreconditionFailed
                | SyncError::NotFound
                | SyncError::Network(_)
                | SyncError::Decode(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<OAuthError> for SyncError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::InvalidState => SyncError::InvalidState,
            OAuthError::InvalidCallback(msg) => SyncError::InvalidCallback(msg),
            _ => SyncError::AuthRequired,
        }
    }
}
