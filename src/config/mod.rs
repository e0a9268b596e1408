// Configuration module entry point
// Layers config file, environment and defaults, and holds runtime state

mod state;
mod types;

use std::net::SocketAddr;

use crate::provision::Provisioner;
use crate::script::ScriptOptions;

// Re-export public types
pub use state::AppState;
pub use types::{Config, LoggingConfig};

const ENV_PREFIX: &str = "FISSION";
const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration using the path given on the command line, if any
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = config_path_from_args(std::env::args().skip(1));
        Self::load_from(&path)
    }

    /// Load configuration from specified file path (without extension)
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8888)?
            .set_default("function.root", "/userfunc")?
            .set_default("function.default_module", "/userfunc/user")?
            .set_default("function.shared_modules", "/app/node_modules")?
            .set_default("logging.level", "info")?
            .set_default("logging.pretty", false)?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive", true)?
            .set_default("performance.connection_timeout", 0)?
            .set_default("http.max_body_size", 10_485_760)? // 10MB
            .set_default("script.memory_limit", 268_435_456)? // 256MB
            .set_default("script.max_stack_size", 1_048_576)?;

        let builder = apply_log_overrides(
            builder,
            std::env::var("LOG_LEVEL").ok(),
            std::env::var("LOG_PRETTY").ok(),
        )?;

        builder.build()?.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }

    pub fn script_options(&self) -> ScriptOptions {
        ScriptOptions {
            memory_limit: self.script.memory_limit,
            max_stack_size: self.script.max_stack_size,
            shared_modules: self.function.shared_modules.clone(),
        }
    }

    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(&self.function.root, &self.function.shared_modules)
    }
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

/// `LOG_LEVEL` and `LOG_PRETTY` win over every other source.
fn apply_log_overrides(
    builder: Builder,
    level: Option<String>,
    pretty: Option<String>,
) -> Result<Builder, config::ConfigError> {
    let builder = match level.filter(|l| !l.trim().is_empty()) {
        Some(level) => builder.set_override("logging.level", level.trim().to_lowercase())?,
        None => builder,
    };
    match pretty {
        Some(pretty) => builder.set_override("logging.pretty", is_truthy(&pretty)),
        None => Ok(builder),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `--config <path>`, `--config=<path>` or a bare first argument
fn config_path_from_args(mut args: impl Iterator<Item = String>) -> String {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        } else if !arg.starts_with('-') {
            return arg;
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}
