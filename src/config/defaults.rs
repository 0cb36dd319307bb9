//! Default configuration values for gstaudit-agent

use super::loader::{Config, DiscoveryConfig, LoggingConfig, ScannerConfig, ServerConfig};
use crate::discovery::AbiProfile;

/// Default controller port
pub const DEFAULT_PORT: u16 = 9000;

/// Returns the default configuration
pub fn default_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connections: 4,
        },
        scanner: ScannerConfig {
            chunk_size: 65536, // 64KB
            align_to_pointer: true,
            max_results: None,
            report_progress: false,
        },
        discovery: DiscoveryConfig {
            class_name: "GstPipeline".to_string(),
            type_query_symbol: "gst_pipeline_get_type".to_string(),
            constructor_symbol: "gst_pipeline_new".to_string(),
            children_symbol: "g_type_children".to_string(),
            free_symbol: "g_free".to_string(),
            profile: AbiProfile::default(),
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            file: None,
        },
    }
}
