//! TOML configuration with environment overrides.
//!
//! Loaded from `--config` (default `./config/index-sync.toml`). Every
//! required value may instead come from the environment, which also
//! overrides the file, so secrets need not be written to disk:
//!
//! | Variable | Key |
//! |----------|-----|
//! | `INDEX_SYNC_INDEX_URL` | `index.url` |
//! | `INDEX_SYNC_INDEX_SCHEMA` | `index.schema` |
//! | `INDEX_SYNC_REPOSITORY_USER` | `repository.user` |
//! | `INDEX_SYNC_REPOSITORY_PASSWORD` | `repository.password` |
//! | `INDEX_SYNC_TYPE_PREFIX` | `events.allowed_type_prefix` |
//! | `INDEX_SYNC_BIND` | `events.bind` |
//! | `INDEX_SYNC_QUEUE` | `events.queue` |
//!
//! # Example
//!
//! ```toml
//! [index]
//! url = "http://localhost:9200/resources/"
//! # schema = "./schema/index.json"
//!
//! [repository]
//! user = "admin"
//! password = "moo"
//!
//! [events]
//! allowed_type_prefix = "http://oapass.org/ns/pass#"
//! bind = "127.0.0.1:7440"
//! queue = "repository"
//!
//! [http]
//! timeout_secs = 30
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::index::SchemaSource;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub url: String,
    /// Index configuration used when the index has to be created.
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

#[derive(Deserialize, Clone, Default)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    #[serde(default)]
    pub allowed_type_prefix: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            allowed_type_prefix: String::new(),
            bind: default_bind(),
            queue: default_queue(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7440".to_string()
}
fn default_queue() -> String {
    "repository".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Where to get the index configuration if the index is absent.
    pub fn schema_source(&self) -> SchemaSource {
        match &self.index.schema {
            Some(path) => SchemaSource::File(path.clone()),
            None => SchemaSource::BuiltIn,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config file")
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`load_config`]).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INDEX_SYNC_INDEX_URL") {
            self.index.url = v;
        }
        if let Some(v) = lookup("INDEX_SYNC_INDEX_SCHEMA") {
            self.index.schema = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("INDEX_SYNC_REPOSITORY_USER") {
            self.repository.user = v;
        }
        if let Some(v) = lookup("INDEX_SYNC_REPOSITORY_PASSWORD") {
            self.repository.password = v;
        }
        if let Some(v) = lookup("INDEX_SYNC_TYPE_PREFIX") {
            self.events.allowed_type_prefix = v;
        }
        if let Some(v) = lookup("INDEX_SYNC_BIND") {
            self.events.bind = v;
        }
        if let Some(v) = lookup("INDEX_SYNC_QUEUE") {
            self.events.queue = v;
        }
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("index.url", &self.index.url),
            ("repository.user", &self.repository.user),
            ("repository.password", &self.repository.password),
            ("events.allowed_type_prefix", &self.events.allowed_type_prefix),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                bail!("Required configuration property is missing: {}", key);
            }
        }

        if !(self.index.url.starts_with("http://") || self.index.url.starts_with("https://")) {
            bail!("index.url must be an http(s) URL, got '{}'", self.index.url);
        }

        if self.events.queue.is_empty() || self.events.queue.contains('/') {
            bail!("events.queue must be a non-empty name without '/'");
        }

        if self.http.timeout_secs == 0 {
            bail!("http.timeout_secs must be > 0");
        }

        Ok(())
    }
}

/// Load, override from the environment, and validate.
///
/// A missing file is not an error as long as the environment supplies every
/// required value.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Config::from_toml_str(&content)?
    } else {
        tracing::debug!(path = %path.display(), "Config file not found, using environment only");
        Config::default()
    };

    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
