use clap::Subcommand;
use taskbridge_core::{Config, CredentialStore, KeyringCredentialStore};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Sign in with Google in the browser
    Login {
        /// OAuth client ID (saved to the config file)
        #[arg(long)]
        client_id: Option<String>,
        /// OAuth client secret (saved to the config file)
        #[arg(long)]
        client_secret: Option<String>,
    },
    /// Remove stored credentials
    Logout,
    /// Check sign-in status
    Status,
}

pub async fn run(action: AuthAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AuthAction::Login {
            client_id,
            client_secret,
        } => {
            let mut config = Config::load()?;
            if client_id.is_some() || client_secret.is_some() {
                if let Some(id) = client_id {
                    config.google.client_id = id;
                }
                if let Some(secret) = client_secret {
                    config.google.client_secret = secret;
                }
                config.save()?;
            }
            let credentials = super::credential_provider(&config)?;
            credentials.sign_in().await?;
            println!("Google Tasks authenticated");
        }
        AuthAction::Logout => {
            KeyringCredentialStore::default().clear()?;
            println!("Google Tasks disconnected");
        }
        AuthAction::Status => {
            let signed_in = matches!(KeyringCredentialStore::default().load(), Ok(Some(_)));
            println!(
                "{}",
                if signed_in {
                    "authenticated"
                } else {
                    "not authenticated"
                }
            );
        }
    }
    Ok(())
}
