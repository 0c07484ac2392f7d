//! # taskbridge Core Library
//!
//! Two-way reconciliation between a local task/list store and Google Tasks.
//! Everything the `taskbridge` CLI does is available here; the binary only
//! wires the pieces together.
//!
//! ## Architecture
//!
//! - **Storage**: data directory, TOML configuration and the [`LocalStore`]
//!   collaborator (in-memory or a JSON snapshot file)
//! - **Integrations**: OAuth2 PKCE sign-in, the keyring-backed
//!   [`CredentialProvider`] and the Google Tasks REST client
//! - **Sync**: identity mapping, last-writer-wins merging and the pass
//!   lifecycle
//!
//! ## Key Components
//!
//! - [`Reconciler`]: one reconciliation pass
//! - [`SyncService`]: single active pass, cancellation, status channel
//! - [`IdentityMapper`]: persistent local <-> remote id table
//! - [`TasksApi`]: the remote operations, implemented by [`GoogleTasksClient`]

pub mod error;
pub mod integrations;
pub mod models;
pub mod storage;
pub mod sync;

pub use error::{ConfigError, CoreError, OAuthError, StoreError};
pub use integrations::{
    CredentialProvider, CredentialStore, GoogleTasksClient, KeyringCredentialStore,
    MemoryCredentialStore, OAuthConfig, OAuthTokens, TasksApi, TokenSource,
};
pub use models::{LocalList, LocalTask};
pub use storage::{Config, JsonStore, LocalStore, MemoryStore};
pub use sync::{
    IdentityMapper, Reconciler, ReconcilerOptions, RemoteList, RemoteTask, SyncError, SyncReport,
    SyncService, SyncStats, SyncStatus,
};
