//! Sync subcommand: run a pass against Google Tasks or inspect the last one.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use taskbridge_core::storage::{data_dir, write_atomic};
use taskbridge_core::{
    Config, CredentialStore, GoogleTasksClient, IdentityMapper, JsonStore, KeyringCredentialStore,
    LocalStore, Reconciler, ReconcilerOptions, SyncReport, SyncService, SyncStatus,
};

const LAST_REPORT_FILE: &str = "last_sync.json";

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run one reconciliation pass and wait for it
    Run {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync settings, sign-in state and the last report
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: SyncAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SyncAction::Run { json } => run_pass(json).await,
        SyncAction::Status { json } => show_status(json),
    }
}

async fn run_pass(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let credentials = super::credential_provider(&config)?;
    if !credentials.is_signed_in() {
        return Err("not signed in; run `taskbridge auth login` first".into());
    }

    let api = Arc::new(
        GoogleTasksClient::new(config.google.api_base.clone())
            .with_page_size(config.sync.page_size),
    );
    let store = Arc::new(JsonStore::open_default()?);
    let mapper = IdentityMapper::open_default()?;
    let reconciler = Reconciler::new(api, credentials, store)
        .with_options(ReconcilerOptions::from(&config.sync));
    let service = SyncService::new(reconciler, mapper, config.sync.enabled);

    let Some(report) = service.sync_now().await else {
        return Err("sync is disabled; run `taskbridge config set sync.enabled true`".into());
    };
    write_atomic(&last_report_path()?, &serde_json::to_vec_pretty(&report)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    match report.status {
        SyncStatus::Error(message) => Err(message.into()),
        _ => Ok(()),
    }
}

fn show_status(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let signed_in = matches!(KeyringCredentialStore::default().load(), Ok(Some(_)));
    let mapper = IdentityMapper::open_default()?;
    let store = JsonStore::open_default()?;
    let local_lists = store.lists()?.len();
    let last = read_last_report()?;

    if json {
        let value = serde_json::json!({
            "enabled": config.sync.enabled,
            "signed_in": signed_in,
            "local_lists": local_lists,
            "mapped_lists": mapper.list_count(),
            "mapped_tasks": mapper.task_count(),
            "last_report": last,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Sync:         {}", if config.sync.enabled { "enabled" } else { "disabled" });
    println!("Google Tasks: {}", if signed_in { "authenticated" } else { "not authenticated" });
    println!("Local lists:  {local_lists}");
    println!("Mapped lists: {}", mapper.list_count());
    println!("Mapped tasks: {}", mapper.task_count());
    match last {
        Some(report) => {
            println!();
            print_report(&report);
        }
        None => println!("Last sync:    never"),
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    match &report.status {
        SyncStatus::Success(at) => println!("Last sync:    succeeded at {}", at.to_rfc3339()),
        SyncStatus::Error(message) => println!("Last sync:    failed: {message}"),
        SyncStatus::Syncing => println!("Last sync:    in progress"),
        SyncStatus::Idle => println!("Last sync:    idle"),
    }
    let s = &report.stats;
    println!("  Lists:      {} down, {} up", s.lists_downloaded, s.lists_uploaded);
    println!("  Tasks:      {} down, {} up", s.tasks_downloaded, s.tasks_uploaded);
    println!("  Conflicts:  {}", s.conflicts);
    println!("  Errors:     {}", s.errors);
}

fn last_report_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    Ok(data_dir()?.join(LAST_REPORT_FILE))
}

fn read_last_report() -> Result<Option<SyncReport>, Box<dyn std::error::Error>> {
    match std::fs::read_to_string(last_report_path()?) {
        Ok(content) => Ok(serde_json::from_str(&content).ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
