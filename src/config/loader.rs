//! Configuration loader for gstaudit-agent
//!
//! Handles loading configuration from TOML files and merging with defaults.

use super::defaults::default_config;
use crate::discovery::AbiProfile;
use crate::memory::ScanOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_scanner")]
    pub scanner: ScannerConfig,

    #[serde(default = "default_discovery")]
    pub discovery: DiscoveryConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

/// Controller listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Only accept pointer-aligned matches
    #[serde(default = "default_align_to_pointer")]
    pub align_to_pointer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Log per-range progress at debug level
    #[serde(default)]
    pub report_progress: bool,
}

impl ScannerConfig {
    /// Scanner options for a target with the given pointer width
    pub fn scan_options(&self, pointer_size: usize) -> ScanOptions {
        ScanOptions {
            chunk_size: self.chunk_size,
            alignment: if self.align_to_pointer { pointer_size } else { 1 },
            max_results: self.max_results,
        }
    }
}

/// What to discover and how to recognise it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_class_name")]
    pub class_name: String,
    #[serde(default = "default_type_query_symbol")]
    pub type_query_symbol: String,
    #[serde(default = "default_constructor_symbol")]
    pub constructor_symbol: String,
    #[serde(default = "default_children_symbol")]
    pub children_symbol: String,
    #[serde(default = "default_free_symbol")]
    pub free_symbol: String,
    #[serde(default)]
    pub profile: AbiProfile,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ConfigLoader {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Loads configuration from file
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(
                self.config_path.display().to_string(),
            ));
        }

        let contents = fs::read_to_string(&self.config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads configuration or returns defaults if file doesn't exist
    pub fn load_or_default(&self) -> Result<Config, ConfigError> {
        match self.load() {
            Err(ConfigError::FileNotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Saves configuration to file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Loads and validates configuration, falling back to defaults when the
/// file does not exist
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let config = ConfigLoader::new(path).load_or_default()?;
    super::validate_config(&config)?;
    Ok(config)
}

// Default functions for serde
fn default_server() -> ServerConfig {
    default_config().server
}

fn default_scanner() -> ScannerConfig {
    default_config().scanner
}

fn default_discovery() -> DiscoveryConfig {
    default_config().discovery
}

fn default_logging() -> LoggingConfig {
    default_config().logging
}

// Individual field defaults
fn default_host() -> String {
    default_config().server.host
}

fn default_port() -> u16 {
    default_config().server.port
}

fn default_max_connections() -> usize {
    default_config().server.max_connections
}

fn default_chunk_size() -> usize {
    default_config().scanner.chunk_size
}

fn default_align_to_pointer() -> bool {
    default_config().scanner.align_to_pointer
}

fn default_class_name() -> String {
    default_config().discovery.class_name
}

fn default_type_query_symbol() -> String {
    default_config().discovery.type_query_symbol
}

fn default_constructor_symbol() -> String {
    default_config().discovery.constructor_symbol
}

fn default_children_symbol() -> String {
    default_config().discovery.children_symbol
}

fn default_free_symbol() -> String {
    default_config().discovery.free_symbol
}

fn default_log_level() -> String {
    default_config().logging.level
}

impl Default for Config {
    fn default() -> Self {
        default_config()
    }
}
