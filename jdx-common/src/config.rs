//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ENV_ROOT_FOLDER: &str = "JDX_ROOT_FOLDER";
/// Environment variable overriding the HTTP bind address
pub const ENV_BIND: &str = "JDX_BIND";
/// Environment variable naming an explicit TOML config file
pub const ENV_CONFIG: &str = "JDX_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "jdx.db";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub bind_address: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            bind_address: default_bind_address(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// `[logging]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive, e.g. "info" or "jdx_ingest=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file (stdout when absent)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// `[ingest]` table: pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestSettings {
    /// Blocking tasks used to fan out row validation (default: 4)
    #[serde(default = "default_validation_workers")]
    pub validation_workers: usize,

    /// Rows routed between batch counter flushes (default: 100)
    #[serde(default = "default_progress_flush_interval")]
    pub progress_flush_interval: usize,

    /// Maximum time to keep retrying a locked database write (default: 5000ms)
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    /// Failed rows included in a batch detail response (default: 50)
    #[serde(default = "default_detail_failed_rows")]
    pub detail_failed_rows: i64,

    /// Page size when the caller does not pass one (default: 50)
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,

    /// Upper bound on caller-requested page size (default: 500)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            validation_workers: default_validation_workers(),
            progress_flush_interval: default_progress_flush_interval(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
            detail_failed_rows: default_detail_failed_rows(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// `[sources.<tag>]` table: per-source validation rule overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceRuleConfig {
    /// Replaces the built-in required field list when present
    #[serde(default)]
    pub required_fields: Option<Vec<String>>,

    /// Extra header aliases (normalized header -> canonical field)
    #[serde(default)]
    pub column_aliases: BTreeMap<String, String>,
}

/// TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub bind_address: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestSettings,

    #[serde(default)]
    pub sources: BTreeMap<String, SourceRuleConfig>,
}

impl TomlConfig {
    /// Load and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load the config at `explicit` (or the discovered default location),
    /// falling back to defaults with a warning
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var(ENV_CONFIG)
                .ok()
                .map(PathBuf::from)
                .or_else(discover_config_file),
        };

        let Some(path) = path else {
            info!("No config file found, using compiled defaults");
            return Self::default();
        };

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{} - using compiled defaults", e);
                Self::default()
            }
        }
    }

    /// Write the config atomically (temp file + rename)
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Root folder resolution (CLI → ENV → TOML → compiled default)
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self {
            cli_arg,
            toml_root: None,
        }
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ENV_ROOT_FOLDER) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        default_root_folder()
    }
}

/// Resolve the bind address (CLI → ENV → TOML → default)
pub fn resolve_bind_address(cli_arg: Option<&str>, config: &TomlConfig) -> String {
    if let Some(addr) = cli_arg {
        return addr.to_string();
    }
    if let Ok(addr) = std::env::var(ENV_BIND) {
        if !addr.trim().is_empty() {
            return addr;
        }
    }
    config
        .bind_address
        .clone()
        .unwrap_or_else(default_bind_address)
}

/// Creates the root folder and locates the database within it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            info!("Creating root folder: {}", self.root_folder.display());
        }
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}

/// Default config file locations for the platform
fn discover_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("jdx").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/jdx/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("jdx"))
        .unwrap_or_else(|| PathBuf::from("./jdx_data"))
}

fn default_bind_address() -> String {
    "127.0.0.1:5780".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_validation_workers() -> usize {
    4
}

fn default_progress_flush_interval() -> usize {
    100
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_detail_failed_rows() -> i64 {
    50
}

fn default_page_size() -> i64 {
    50
}

fn default_max_page_size() -> i64 {
    500
}
