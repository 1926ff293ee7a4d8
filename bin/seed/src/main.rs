//! # seed
//!
//! Provisions an administrator account in the configured database:
//!
//! ```text
//! seed <username> <password> [--email <email>]
//! FORUM_SEED_PASSWORD=... seed <username>
//! ```

use clap::Parser;
use rf_auth_simple::SimpleAuthProvider;
use rf_config::Settings;
use rf_core::{AppError, ForumService};
use rf_db_sqlite::SqliteForumRepo;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Create a Rusty-Forum administrator account
#[derive(Parser, Debug)]
#[command(name = "seed")]
struct Args {
    /// Username of the administrator
    username: String,

    /// Password; prefer the environment variable to keep it out of shell history
    #[arg(env = "FORUM_SEED_PASSWORD", hide_env_values = true)]
    password: String,

    /// Optional contact address
    #[arg(long, default_value = "")]
    email: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Args { username, password, email } = Args::parse();
    let password = SecretString::from(password);

    let settings = Settings::load()?;
    let repo = Arc::new(SqliteForumRepo::new(settings.database.url.expose_secret(), 1).await?);
    let forum = ForumService::new(repo.clone(), repo, Arc::new(SimpleAuthProvider::new()));

    match forum
        .create_staff(&username, &email, password.expose_secret())
        .await
    {
        Ok(user) => info!(user = user.id, "administrator {} created", user.username),
        Err(AppError::Conflict(_)) => warn!("user {username} already exists, nothing to do"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
