//! Basic CLI E2E tests.
//!
//! Every test runs the built binary against a throwaway home directory so
//! config and data files never touch the real one.

use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command with `home` as the home directory.
fn run_cli(home: &TempDir, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_taskbridge"))
        .args(args)
        .env("HOME", home.path())
        .env_remove("TASKBRIDGE_ENV")
        .env_remove("GOOGLE_CLIENT_ID")
        .env_remove("GOOGLE_CLIENT_SECRET")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("auth"));
    assert!(stdout.contains("sync"));
    assert!(stdout.contains("config"));
}

#[test]
fn test_config_defaults_are_written() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["config", "get", "sync.max_concurrent_lists"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "4");
    assert!(home.path().join(".config/taskbridge/config.toml").exists());
}

#[test]
fn test_config_set_persists() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["config", "set", "sync.page_size", "50"]);
    assert_eq!(code, 0, "{stdout}");

    let (stdout, _, code) = run_cli(&home, &["config", "get", "sync.page_size"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "50");
}

#[test]
fn test_config_rejects_bad_values() {
    let home = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(&home, &["config", "set", "sync.enabled", "sometimes"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"));

    let (_, stderr, code) = run_cli(&home, &["config", "get", "sync.nope"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_config_list_is_json() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["config", "list"]);
    assert_eq!(code, 0);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["sync"]["enabled"], serde_json::Value::Bool(true));
    assert_eq!(value["google"]["redirect_port"], 19821);
}

#[test]
fn test_sync_run_without_client_credentials_fails() {
    let home = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(&home, &["sync", "run"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("not configured"), "{stderr}");
}
