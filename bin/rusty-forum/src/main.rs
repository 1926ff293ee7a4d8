//! # Rusty-Forum Binary
//!
//! The entry point that assembles the application based on compile-time features.

use rf_api::{router, AppState};
use rf_config::{LogSettings, Settings};
use rf_core::ForumService;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tower_sessions::cookie::SameSite;
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

// Feature-gated imports: each port is filled by the plugin compiled in
#[cfg(feature = "db-sqlite")]
use rf_db_sqlite::SqliteForumRepo;

#[cfg(feature = "auth-simple")]
use rf_auth_simple::SimpleAuthProvider;

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings.log);

    // 1. Initialize Database Implementation
    #[cfg(feature = "db-sqlite")]
    let repo = Arc::new(
        SqliteForumRepo::new(
            settings.database.url.expose_secret(),
            settings.database.max_connections,
        )
        .await?,
    );

    // 2. Initialize Auth Implementation
    #[cfg(feature = "auth-simple")]
    let auth = Arc::new(SimpleAuthProvider::new());

    // 3. Wrap in AppState (the service only sees the port traits)
    let state = AppState {
        forum: ForumService::new(repo.clone(), repo, auth),
    };

    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_name(settings.session.cookie_name.clone())
        .with_secure(settings.session.secure_cookies)
        .with_same_site(SameSite::Lax)
        .with_http_only(true);

    let addr = settings.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Rusty-Forum starting on http://{addr}");

    axum::serve(listener, router(state, sessions)).await?;
    Ok(())
}
