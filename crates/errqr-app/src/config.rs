//! Application configuration.
//!
//! Settings come from an optional JSON file, then the environment, then
//! command line flags, each layer overriding the one before. Without
//! `--config` the file is looked up at `~/.config/errqr/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use errqr_common::{LogConfig, LogFormat, ResultExt};
use errqr_report::StoreConfig;
use serde::{Deserialize, Serialize};
use url::Url;

/// Application name used for config/cache directory paths.
const APP_NAME: &str = "errqr";

const CONFIG_FILE: &str = "config.json";

const CACHE_DB: &str = "caches.db";

/// Origin of the app when nothing else is configured.
pub const DEFAULT_ORIGIN: &str = "http://localhost:5173/";

/// On-disk layout of the config file. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub origin: Option<String>,
    pub cache_db: Option<PathBuf>,
    pub log_format: Option<String>,
    pub log_filter: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
}

impl FileConfig {
    /// Read a config file. A missing file at the default location is empty.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))
    }
}

/// Values given on the command line or through `ERRQR_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub origin: Option<String>,
    pub cache_db: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
    pub verbosity: u8,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub origin: Url,
    pub cache_db: PathBuf,
    pub log: LogConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load from file, environment and flags.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = FileConfig::load(path)?;
        Self::resolve(file, StoreConfig::from_env(), overrides)
    }

    /// Merge the layers. `env_store` beats the file; `overrides` beat both.
    pub fn resolve(file: FileConfig, env_store: StoreConfig, overrides: Overrides) -> Result<Self> {
        let origin = overrides
            .origin
            .or(file.origin)
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        let origin = Url::parse(&origin).config_context(format!("Invalid origin '{origin}'"))?;

        let cache_db = overrides
            .cache_db
            .or(file.cache_db)
            .unwrap_or_else(default_cache_db);

        let format = match (overrides.log_format, file.log_format.as_deref()) {
            (Some(format), _) => format,
            (None, Some(name)) => name.parse().map_err(anyhow::Error::msg)?,
            (None, None) => LogFormat::default(),
        };
        let mut log = LogConfig::from_verbosity(overrides.verbosity).with_format(format);
        if overrides.verbosity == 0 {
            if let Some(filter) = file.log_filter {
                log = log.with_filter(filter);
            }
        }

        let file_store = StoreConfig::new(
            file.supabase_url.as_deref(),
            file.supabase_anon_key.as_deref(),
        );

        Ok(Self {
            origin,
            cache_db,
            log,
            store: env_store.or(file_store),
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
}

/// Cache database under the platform cache directory, with fallback.
fn default_cache_db() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join(APP_NAME).join(CACHE_DB),
        None => PathBuf::from(".errqr").join(CACHE_DB),
    }
}
