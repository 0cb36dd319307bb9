//! Configuration module for gstaudit-agent
//!
//! Provides configuration loading, validation, and default settings
//! for the agent and its controller listener.

mod defaults;
mod loader;
mod validator;

pub use defaults::{default_config, DEFAULT_PORT};
pub use loader::{load_config, ConfigLoader};
pub use validator::{validate_config, ConfigValidator};

// Re-export the configuration structures
pub use loader::{Config, DiscoveryConfig, LoggingConfig, ScannerConfig, ServerConfig};

// Configuration-related error type
pub use loader::ConfigError;

// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
