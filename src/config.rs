//! Configuration loader and validator for the feed server.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    pub store: Store,
    #[serde(default)]
    pub feed: Feed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
        }
    }
}

/// Relational backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum Store {
    /// Hosted store reached over its REST endpoint.
    Rest {
        url: String,
        api_key: String,
        #[serde(default = "default_timeout")]
        timeout_seconds: u64,
    },
    /// Local sqlite database; `DATABASE_URL` overrides `database_url`.
    Sqlite { database_url: String },
}

fn default_timeout() -> u64 {
    10
}

/// What happens when an interleave slot has nothing eligible to show.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlotPolicy {
    /// Leave the slot out and keep the organic posts.
    #[default]
    Skip,
    /// Fail the whole request.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    #[serde(default)]
    pub slot_policy: SlotPolicy,
    /// Upper bound on posts enriched at the same time within one request.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    32
}

impl Default for Feed {
    fn default() -> Self {
        Self {
            slot_policy: SlotPolicy::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind must be non-empty"));
    }

    match &cfg.store {
        Store::Rest {
            url,
            api_key,
            timeout_seconds,
        } => {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid("store.url must be non-empty"));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid("store.url must be an http(s) URL"));
            }
            if api_key.trim().is_empty() {
                return Err(ConfigError::Invalid("store.api_key must be non-empty"));
            }
            if *timeout_seconds == 0 {
                return Err(ConfigError::Invalid("store.timeout_seconds must be > 0"));
            }
        }
        Store::Sqlite { database_url } => {
            if database_url.trim().is_empty() {
                return Err(ConfigError::Invalid("store.database_url must be non-empty"));
            }
        }
    }

    if cfg.feed.max_concurrency == 0 {
        return Err(ConfigError::Invalid("feed.max_concurrency must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"server:
  bind: "0.0.0.0:3000"

store:
  backend: rest
  url: "https://YOUR_PROJECT.supabase.co"
  api_key: "YOUR_SERVICE_KEY"
  timeout_seconds: 10

feed:
  slot_policy: skip
  max_concurrency: 32
"#
}
