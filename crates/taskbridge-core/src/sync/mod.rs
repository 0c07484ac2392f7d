//! Two-way synchronization with the remote task service.
//!
//! A pass reconciles lists first, then the tasks of every mapped list.
//! Identity mappings persist between passes so re-running a pass never
//! duplicates records.

pub mod conflict;
pub mod engine;
pub mod mapping;
pub mod position;
pub mod service;
pub mod types;


pub use conflict::{decide_merge, MergeDecision};
pub use engine::{PassOutcome, Reconciler, ReconcilerOptions};
pub use mapping::{IdentityMapper, MappingChange, TaskMapping};
pub use service::SyncService;
pub use types::{RemoteList, RemoteTask, SyncError, SyncReport, SyncStats, SyncStatus, TaskStatus};
