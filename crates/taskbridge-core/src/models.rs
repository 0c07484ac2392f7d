//! Local list and task records, as owned by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task list in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalList {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub position: f64,
    pub updated_at: DateTime<Utc>,
}

impl LocalList {
    /// Create a list with a fresh id, stamped now.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            position: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// A task in the local store.
///
/// `parent_id`, when set, names another task of the same list. Callers keep
/// the hierarchy acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTask {
    pub id: String,
    pub list_id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub position: f64,
    pub updated_at: DateTime<Utc>,
}

impl LocalTask {
    /// Create a top-level task with a fresh id, stamped now.
    pub fn new(list_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            list_id: list_id.into(),
            title: title.into(),
            notes: String::new(),
            due: None,
            completed: false,
            parent_id: None,
            position: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Make this task a subtask of `parent_id`.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}
