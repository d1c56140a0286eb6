use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("unknown environment '{}'", other),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// sqlx connection string for the article store
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Database name, only used for display
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Development mode adds raw error text to 500 responses
    #[serde(default)]
    pub environment: Environment,
}

fn default_database_url() -> String {
    "sqlite:news_aggregator.db?mode=rwc".to_string()
}

fn default_db_name() -> String {
    "news_aggregator".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            db_name: default_db_name(),
            port: default_port(),
            environment: Environment::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Builds the process configuration: defaults, then the TOML file named
    /// by `CONFIG_FILE` (or `server.toml` when present), then environment
    /// variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let base = match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::load(&path).with_context(|| format!("failed to load {}", path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE)
                .with_context(|| format!("failed to load {}", DEFAULT_CONFIG_FILE))?,
            Err(_) => Self::default(),
        };

        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `DATABASE_URL`, `DB_NAME`, `PORT` and `APP_ENV` from `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(name) = lookup("DB_NAME") {
            self.db_name = name;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT value '{}'", port))?;
        }
        if let Some(env) = lookup("APP_ENV") {
            self.environment = env.parse()?;
        }
        Ok(self)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
