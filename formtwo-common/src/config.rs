//! Configuration loading and survey directory resolution
//!
//! Bootstrap configuration lives in `formtwo.toml`. A missing file is not an
//! error: the tools warn and fall back to compiled defaults.
//!
//! Survey directory priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `FORMTWO_SURVEY_DIR`
//! 3. TOML config file `survey_dir`
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the survey directory
pub const SURVEY_DIR_ENV: &str = "FORMTWO_SURVEY_DIR";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "FORMTWO_CONFIG";

/// Collector endpoint used when the config does not name one
pub const DEFAULT_COLLECTOR_URL: &str =
    "http://154.38.171.54:8288/uissurvey-app/api/surveyanswer";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Directory holding the day files (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Upload pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_collector_url")]
    pub collector_url: String,

    /// Per-document request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Budget for the pre-flight connectivity check
    #[serde(default = "default_connect_check_timeout_ms")]
    pub connect_check_timeout_ms: u64,

    /// Documents uploaded at the same time (1 = strictly sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub discovery: DiscoveryPolicy,
}

/// How discovery treats a day file it cannot read or parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPolicy {
    /// One bad file fails the whole discovery
    #[default]
    Strict,
    /// Bad files are reported and left out; the rest are listed
    SkipInvalid,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_collector_url() -> String {
    DEFAULT_COLLECTOR_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_check_timeout_ms() -> u64 {
    3000
}

fn default_concurrency() -> usize {
    1
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            collector_url: default_collector_url(),
            timeout_secs: default_timeout_secs(),
            connect_check_timeout_ms: default_connect_check_timeout_ms(),
            concurrency: default_concurrency(),
            discovery: DiscoveryPolicy::default(),
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_check_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_check_timeout_ms)
    }
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let toml_str = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: TomlConfig = toml::from_str(&toml_str)
            .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load the config file, falling back to defaults when it does not exist
    ///
    /// A file that exists but cannot be parsed is still an error.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        let path = match resolve_config_path(cli_path) {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            warn!("Config file {:?} not found, using built-in defaults", path);
            return Ok(Self::default());
        }

        let config = Self::load(&path)?;
        info!("Loaded TOML configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.concurrency == 0 {
            return Err(Error::Config("upload.concurrency must be at least 1".to_string()));
        }
        if self.upload.timeout_secs == 0 {
            return Err(Error::Config("upload.timeout_secs must be at least 1".to_string()));
        }
        if self.upload.collector_url.trim().is_empty() {
            return Err(Error::Config("upload.collector_url must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Config file location: CLI → `FORMTWO_CONFIG` → platform config directory
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    default_config_path()
}

/// `<config dir>/formtwo/formtwo.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("formtwo").join("formtwo.toml"))
}

/// Survey directory resolution
pub fn resolve_survey_dir(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(SURVEY_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.survey_dir {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_survey_dir()
}

/// OS-dependent default survey directory
pub fn default_survey_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("formtwo").join("files"))
        .unwrap_or_else(|| PathBuf::from("./formtwo_data"))
}

/// Create the survey directory if it does not exist yet
pub fn ensure_survey_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created survey directory {:?}", path);
    } else if !path.is_dir() {
        return Err(Error::Config(format!("{:?} exists but is not a directory", path)));
    }
    Ok(())
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let body = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize TOML: {}", e)))?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path_for(target);
    std::fs::write(&temp, body)?;
    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Sibling path `<name>.tmp` used for atomic replacement
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}
