//! # rf-config
//!
//! Layered settings: built-in defaults, then `config/forum.toml` (optional),
//! then `FORUM__*` environment variables. A `.env` file is read first so its
//! entries behave like real environment variables.
//!
//! ```text
//! FORUM__SERVER__PORT=9000
//! FORUM__DATABASE__URL=sqlite:forum.db
//! FORUM__SESSION__SECURE_COOKIES=true
//! ```

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub session: SessionSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// sqlx connection URL, e.g. `sqlite:rusty_forum.db`
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    pub cookie_name: String,
    /// Set when served over HTTPS
    pub secure_cookies: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Settings {
    /// Loads settings from `config/forum.*` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            tracing::debug!("loaded .env");
        }
        Self::from_sources(Some("config/forum"))
    }

    /// Builds settings from an optional config file (without extension) plus
    /// the environment. Every key has a default, so no file is required.
    pub fn from_sources(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .set_default("database.url", "sqlite:rusty_forum.db")?
            .set_default("database.max_connections", 5)?
            .set_default("session.cookie_name", "rusty-forum-session")?
            .set_default("session.secure_cookies", false)?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?;

        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        let settings = builder
            .add_source(Environment::with_prefix("FORUM").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
