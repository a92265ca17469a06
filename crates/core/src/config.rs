//! Application configuration.
//!
//! Values are layered: built-in defaults, then the TOML file under the user's
//! config directory, then `BUSBOARD_*` environment variables.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Directory under `~/.config` holding the config file and saved data.
pub const APP_DIR: &str = "busboard";
const CONFIG_FILE: &str = "config.toml";

const DEFAULT_CONFIG: &str = r#"# busboard configuration

# Service key issued by data.go.kr (decoded form).
service_key = ""
api_base_url = "http://apis.data.go.kr"

# Seconds between automatic arrival refreshes.
refresh_interval_secs = 30
request_timeout_secs = 10

# Persist saved stops on this interval as well as on exit (optional).
# autosave_interval_secs = 300

# Location used for weather and nearby stop search.
# Without it both features stay disabled.
# latitude = 37.5665
# longitude = 126.9780

# iCalendar file read for today's first event (optional).
# calendar_path = "/home/me/calendar.ics"
"#;

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the public data portal.
    pub service_key: String,
    /// Base URL of the public data portal.
    pub api_base_url: String,
    /// Seconds between interval refreshes.
    pub refresh_interval_secs: u64,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Optional periodic save interval in seconds.
    #[serde(default)]
    pub autosave_interval_secs: Option<u64>,
    /// Directory holding persisted stops and settings.
    pub data_dir: PathBuf,
    /// Latitude of the user's location.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude of the user's location.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// iCalendar file with the user's events.
    #[serde(default)]
    pub calendar_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default file location and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration from an explicit file path and the environment.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data_dir = default_root().join("data");
        let settings = Config::builder()
            .set_default("service_key", "")?
            .set_default("api_base_url", "http://apis.data.go.kr")?
            .set_default("refresh_interval_secs", 30)?
            .set_default("request_timeout_secs", 10)?
            .set_default("data_dir", data_dir.to_string_lossy().to_string())?
            .add_source(File::from(path.clone()).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("BUSBOARD").try_parsing(true))
            .build()
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = settings
            .try_deserialize()
            .context("failed to parse configuration")?;
        if config.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be positive");
        }
        Ok(config)
    }

    /// Configured location, when both coordinates are present.
    pub fn location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// Interval between refresh cycles.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Interval between periodic saves, if enabled.
    pub fn autosave_interval(&self) -> Option<Duration> {
        self.autosave_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Root directory for busboard under the user's config directory.
pub fn default_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Location of the configuration file.
pub fn config_path() -> PathBuf {
    default_root().join(CONFIG_FILE)
}

/// Write a commented default configuration file if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = config_path();
    if path.exists() {
        return Ok(path);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
