use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backup root used when none is configured or the configured value is blank
pub const DEFAULT_BACKUP_FOLDER: &str = "/ghbackup";

/// Environment variable holding the GitHub token
pub const TOKEN_ENV: &str = "GITHUB_SECRET";

/// Environment variable overriding the backup root
pub const BACKUP_FOLDER_ENV: &str = "BACKUP_FOLDER";

/// Environment variable overriding the daemon interval
pub const INTERVAL_ENV: &str = "BACKUP_INTERVAL";

/// Main configuration structure for ghbackup
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root directory holding `<owner>/<name>.git` mirrors
    #[serde(default)]
    pub backup_folder: String,

    /// GitHub API and clone host settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Per-repository synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Scheduling and run lock settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Host used to build clone URLs
    #[serde(default = "default_host")]
    pub host: String,

    /// API base URL override (GitHub Enterprise)
    #[serde(default)]
    pub api_url: Option<String>,

    /// Repositories requested per listing page
    #[serde(default = "default_per_page")]
    pub per_page: u8,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SyncConfig {
    /// Timeout for transfer commands in seconds, 0 disables it
    #[serde(default)]
    pub timeout: u64,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// Interval between scheduled runs
    #[serde(default = "default_interval")]
    pub interval: String, // "24h"

    /// Lock file guarding against overlapping runs, empty disables it
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "json"
}

fn default_host() -> String {
    "github.com".to_string()
}
fn default_per_page() -> u8 {
    100
}
fn default_interval() -> String {
    "24h".to_string()
}
fn default_lock_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/ghbackup.lock", runtime_dir)
    } else {
        "/tmp/ghbackup.lock".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_url: None,
            per_page: default_per_page(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            lock_file: default_lock_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_folder: DEFAULT_BACKUP_FOLDER.to_string(),
            github: GitHubConfig::default(),
            sync: SyncConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("ghbackup").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.backup_folder = shellexpand::full(&self.backup_folder)
            .context("Failed to expand backup_folder path")?
            .into_owned();

        self.daemon.lock_file = shellexpand::full(&self.daemon.lock_file)
            .context("Failed to expand lock_file path")?
            .into_owned();

        Ok(())
    }

    /// Apply a backup folder override, ignoring blank values
    pub fn override_backup_folder(&mut self, folder: Option<&str>) -> Result<()> {
        if let Some(folder) = folder.filter(|f| !f.trim().is_empty()) {
            self.backup_folder = shellexpand::full(folder)
                .context("Failed to expand backup folder override")?
                .into_owned();
        }
        Ok(())
    }

    /// Apply a daemon interval override, ignoring blank values
    pub fn override_interval(&mut self, interval: Option<&str>) {
        if let Some(interval) = interval.filter(|i| !i.trim().is_empty()) {
            self.daemon.interval = interval.trim().to_string();
        }
    }

    /// Effective backup root: the configured folder, or the default when blank
    pub fn backup_root(&self) -> PathBuf {
        resolve_backup_root(&self.backup_folder)
    }

    /// Transfer command timeout, if enabled
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.sync.timeout > 0).then(|| Duration::from_secs(self.sync.timeout))
    }

    /// Lock file path, if locking is enabled
    pub fn lock_path(&self) -> Option<PathBuf> {
        let lock_file = self.daemon.lock_file.trim();
        (!lock_file.is_empty()).then(|| PathBuf::from(lock_file))
    }

    /// Parsed daemon interval
    pub fn interval(&self) -> Result<Duration> {
        parse_interval(&self.daemon.interval)
    }
}

/// Resolve a possibly blank backup folder to the directory actually used
pub fn resolve_backup_root(folder: &str) -> PathBuf {
    if folder.trim().is_empty() {
        PathBuf::from(DEFAULT_BACKUP_FOLDER)
    } else {
        PathBuf::from(folder)
    }
}

/// Parse interval strings like "30m", "6h", "1d" or raw seconds
pub fn parse_interval(interval: &str) -> Result<Duration> {
    let interval = interval.trim().to_lowercase();

    let (value, unit, label) = if let Some(value) = interval.strip_suffix('s') {
        (value, 1u64, "seconds")
    } else if let Some(value) = interval.strip_suffix('m') {
        (value, 60, "minutes")
    } else if let Some(value) = interval.strip_suffix('h') {
        (value, 3600, "hours")
    } else if let Some(value) = interval.strip_suffix('d') {
        (value, 86400, "days")
    } else {
        (interval.as_str(), 1, "interval")
    };

    let seconds = value
        .parse::<u64>()
        .with_context(|| {
            format!(
                "Invalid {} value. Use format like '30m', '6h', '1d'",
                label
            )
        })?
        .checked_mul(unit)
        .context("Interval is too large")?;

    if seconds == 0 {
        bail!("Interval must be greater than zero");
    }

    Ok(Duration::from_secs(seconds))
}
