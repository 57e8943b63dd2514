//! Configuration for the holiday cache and its remote feed.
//!
//! Every field has a default, so an absent or partial TOML file is valid:
//!
//! ```toml
//! db_path = "/var/lib/dcalendar/weekday.sqlite"
//!
//! [source]
//! url = "https://www8.cao.go.jp/chosei/shukujitsu/syukujitsu.csv"
//! connect_timeout_secs = 3
//! read_timeout_secs = 9
//! encoding = "Shift_JIS"
//! ```

use crate::error::{SyncError, SyncResult};
use crate::sqlite::SqliteConfig;
use crate::sync::holiday_schema;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cabinet Office list of national holidays.
pub const DEFAULT_FEED_URL: &str = "https://www8.cao.go.jp/chosei/shukujitsu/syukujitsu.csv";
pub const DEFAULT_DB_FILE: &str = "weekday.sqlite";
/// The feed does not declare a charset; it is served as Shift_JIS (cp932).
pub const DEFAULT_ENCODING: &str = "Shift_JIS";

const APP_DIR: &str = "dcalendar";
const CONFIG_FILE: &str = "config.toml";

/// Where and how the holiday dataset is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Encoding used when the response does not declare one.
    pub encoding: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            connect_timeout_secs: 3,
            read_timeout_secs: 9,
            encoding: DEFAULT_ENCODING.to_string(),
        }
    }
}

impl SourceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub source: SourceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            source: SourceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::parse(&content)
            .map_err(|err| SyncError::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path` if given, otherwise the file in the platform config
    /// directory when it exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> SyncResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Store configuration with the holiday tables as its schema.
    pub fn store_config(&self) -> SqliteConfig {
        SqliteConfig::new(self.db_path.to_string_lossy().into_owned(), holiday_schema())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}
