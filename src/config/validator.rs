//! Configuration validator for gstaudit-agent
//!
//! Validates configuration values to ensure they are within acceptable ranges.

use super::loader::{Config, ConfigError, DiscoveryConfig, LoggingConfig, ScannerConfig, ServerConfig};
use crate::memory::MAX_STRING_LEN;

/// Largest accepted field offset in an ABI profile
const MAX_FIELD_OFFSET: usize = 0x1_0000;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire configuration
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        Self::validate_server(&config.server)?;
        Self::validate_scanner(&config.scanner)?;
        Self::validate_discovery(&config.discovery)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    /// Validates server configuration
    fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
        if server.port == 0 {
            return Err(ConfigError::Invalid("Server port cannot be 0".to_string()));
        }

        if server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "Maximum connections must be at least 1".to_string(),
            ));
        }

        if server.max_connections > 1000 {
            return Err(ConfigError::Invalid(
                "Maximum connections cannot exceed 1000".to_string(),
            ));
        }

        if server.host.is_empty() {
            return Err(ConfigError::Invalid(
                "Server host cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates scanner configuration
    fn validate_scanner(scanner: &ScannerConfig) -> Result<(), ConfigError> {
        if scanner.chunk_size == 0 || !scanner.chunk_size.is_power_of_two() {
            return Err(ConfigError::Invalid(
                "Chunk size must be a power of 2".to_string(),
            ));
        }

        if scanner.max_results == Some(0) {
            return Err(ConfigError::Invalid(
                "Maximum results must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates discovery symbols and the ABI profile
    fn validate_discovery(discovery: &DiscoveryConfig) -> Result<(), ConfigError> {
        let symbols = [
            ("class_name", &discovery.class_name),
            ("type_query_symbol", &discovery.type_query_symbol),
            ("constructor_symbol", &discovery.constructor_symbol),
            ("children_symbol", &discovery.children_symbol),
            ("free_symbol", &discovery.free_symbol),
        ];
        for (field, value) in symbols {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("discovery.{field} cannot be empty")));
            }
        }

        let profile = &discovery.profile;
        if !matches!(profile.pointer_size, 4 | 8) {
            return Err(ConfigError::Invalid(format!(
                "Pointer size must be 4 or 8, got {}",
                profile.pointer_size
            )));
        }

        for (field, offset) in [("name_offset", profile.name_offset), ("state_offset", profile.state_offset)] {
            if offset > MAX_FIELD_OFFSET {
                return Err(ConfigError::Invalid(format!(
                    "discovery.profile.{field} must not exceed {MAX_FIELD_OFFSET:#x}, got {offset:#x}"
                )));
            }
        }

        if profile.state_min > profile.state_max {
            return Err(ConfigError::Invalid(format!(
                "State range is empty: [{}, {}]",
                profile.state_min, profile.state_max
            )));
        }

        if profile.max_name_len == 0 || profile.max_name_len > MAX_STRING_LEN {
            return Err(ConfigError::Invalid(format!(
                "Maximum name length must be between 1 and {MAX_STRING_LEN}, got {}",
                profile.max_name_len
            )));
        }

        Ok(())
    }

    /// Validates logging configuration
    fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                logging.level, valid_levels
            )));
        }

        if logging.file.as_ref().is_some_and(|f| f.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid(
                "Log file path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validates a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    ConfigValidator::validate(config)
}
