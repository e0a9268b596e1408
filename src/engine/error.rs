//! Error taxonomy of the function engine
//!
//! Resolution and selection failures are recovered into a specialization
//! failure response; invocation failures are reported per request.

use std::path::PathBuf;
use thiserror::Error;

/// The module reference could not be mapped to a loadable file
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Module file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Could not resolve module with supported extensions: {}", .0.display())]
    NoExtensionMatch(PathBuf),

    #[error("No supported module files found in {}", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("Failed to inspect {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// No callable could be selected from a loaded module
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Export '{0}' was not found or is not a function")]
    NamedExportMissing(String),

    #[error("No callable default export found")]
    NoCallableExport,
}

/// The resolved file could not be loaded into the script host
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read module {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to evaluate module {}: {message}", path.display())]
    Evaluate { path: PathBuf, message: String },

    #[error("Script host is not running")]
    HostUnavailable,
}

#[derive(Debug, Error)]
pub enum SpecializeError {
    #[error("Not a generic container")]
    AlreadySpecialized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// A single invocation failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("Not specialized")]
    NotSpecialized,

    #[error("{0}")]
    ContractViolation(String),

    #[error("User function threw: {0}")]
    Thrown(String),

    #[error("User function rejected: {0}")]
    Rejected(String),

    #[error("Script host is not running")]
    HostUnavailable,
}

impl InvokeError {
    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}
