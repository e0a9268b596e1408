//! Access log records
//!
//! One record per request, emitted as structured fields so both the JSON and
//! the pretty formatter render it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Access log entry containing all request/response information
#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request URI path
    pub path: String,
    /// Response status code
    pub status: u16,
    /// Time spent producing the response
    pub duration: Duration,
    /// Source file of the active function, for invocations
    pub specialized_path: Option<PathBuf>,
}

impl AccessLogEntry {
    /// Start timing a request
    pub fn start(method: &str, path: &str) -> (Self, Instant) {
        (
            Self {
                method: method.to_string(),
                path: path.to_string(),
                status: 200,
                duration: Duration::ZERO,
                specialized_path: None,
            },
            Instant::now(),
        )
    }

    #[must_use]
    pub fn finish(mut self, status: u16, started: Instant) -> Self {
        self.status = status;
        self.duration = started.elapsed();
        self
    }

    #[must_use]
    pub fn with_specialized_path(mut self, path: Option<PathBuf>) -> Self {
        self.specialized_path = path;
        self
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub(super) fn emit(&self) {
        match &self.specialized_path {
            Some(specialized) => tracing::info!(
                target: "access",
                method = %self.method,
                path = %self.path,
                status = self.status,
                duration_ms = self.duration_ms(),
                specialized_path = %specialized.display(),
                "{} {} {}", self.method, self.path, self.status
            ),
            None => tracing::info!(
                target: "access",
                method = %self.method,
                path = %self.path,
                status = self.status,
                duration_ms = self.duration_ms(),
                "{} {} {}", self.method, self.path, self.status
            ),
        }
    }
}
