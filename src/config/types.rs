// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub function: FunctionConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    pub script: ScriptConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Where user code lives
#[derive(Debug, Deserialize, Clone)]
pub struct FunctionConfig {
    /// Base path for `/v2/specialize` requests without a `filepath`
    pub root: PathBuf,
    /// Module loaded by the legacy `/specialize` endpoint
    pub default_module: PathBuf,
    /// Dependencies linked into the function root on specialization
    pub shared_modules: PathBuf,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Human-readable lines instead of JSON
    pub pretty: bool,
    pub access_log: bool,
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive: bool,
    /// Whole-connection timeout in seconds, 0 to disable
    pub connection_timeout: u64,
    pub max_connections: Option<u64>,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub max_body_size: u64,
}

/// Embedded JavaScript runtime limits
#[derive(Debug, Deserialize, Clone)]
pub struct ScriptConfig {
    pub memory_limit: usize,
    pub max_stack_size: usize,
}
