use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default bound on `list` and `/api/jobs` results. Held here, handed down
/// explicitly at startup; nothing reads it as ambient global state.
pub const DEFAULT_LIMIT: u32 = 200;

/// Top-level configuration loaded from runledger.toml. Every field has a
/// default; CLI flags override whatever is loaded.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct QueueConfig {
    pub storage: StorageConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub limit: u32,
    pub dashboard: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("runs/job_queue.sqlite3"),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7801,
            limit: DEFAULT_LIMIT,
            dashboard: None,
        }
    }
}

/// Load config from the given path. A missing file is the defaults; a file
/// that fails to parse is logged and also degrades to the defaults rather
/// than aborting a queue operation.
pub fn load(path: &Path) -> QueueConfig {
    let Ok(text) = std::fs::read_to_string(path) else {
        return QueueConfig::default();
    };
    match toml::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unparseable config: {e}");
            QueueConfig::default()
        }
    }
}
