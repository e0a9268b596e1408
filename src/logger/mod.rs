//! Logger module
//!
//! Provides logging utilities for the server including:
//! - Subscriber setup (JSON lines or pretty single lines)
//! - Server lifecycle logging
//! - Specialization and access records

mod access;

pub use access::AccessLogEntry;

use std::net::SocketAddr;
use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};

/// Initialize the global subscriber
///
/// Should be called once at application startup. `RUST_LOG` takes precedence
/// over the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.pretty {
        tracing_subscriber::registry()
            .with(fmt::layer().compact().with_target(true))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .with(filter)
            .try_init()
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    tracing::info!(
        address = %addr,
        function_root = %config.function.root.display(),
        workers = config.server.workers,
        "Server listening on http://{addr}"
    );
}

pub fn log_server_stop() {
    tracing::info!("Server stopped accepting connections");
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    tracing::debug!(peer = %peer_addr, "Connection accepted");
}

pub fn log_connection_error(err: &impl std::fmt::Display) {
    tracing::debug!(error = %err, "Failed to serve connection");
}

pub fn log_error(message: &str) {
    tracing::error!("{message}");
}

pub fn log_warning(message: &str) {
    tracing::warn!("{message}");
}

pub fn log_specialized(module_path: &Path, function_name: Option<&str>) {
    tracing::info!(
        module_path = %module_path.display(),
        function_name,
        "User code loaded"
    );
}

pub fn log_specialize_failed(error: &impl std::fmt::Display, path: &Path, function_name: Option<&str>) {
    tracing::error!(
        error = %error,
        module_path = %path.display(),
        function_name,
        "Failed to specialize"
    );
}

pub fn log_invoke_failed(error: &impl std::fmt::Display, path: &str) {
    tracing::error!(error = %error, path, "Request failed");
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry) {
    entry.emit();
}
