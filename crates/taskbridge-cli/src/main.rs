use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "taskbridge", version, about = "Two-way sync between local tasks and Google Tasks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Google sign-in management
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Run or inspect synchronization
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn install_tracing() {
    // RUST_LOG wins; otherwise info.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    install_tracing();

    let result = match cli.command {
        Commands::Auth { action } => commands::auth::run(action).await,
        Commands::Sync { action } => commands::sync::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
