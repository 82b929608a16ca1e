use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SourceType;

/// Coarse classification of a [`SourceError`], stable across mediums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Io,
    Serialization,
    Network,
    Storage,
    Cancelled,
    Unavailable,
    Exhausted,
    Other,
}

/// Failure reported by a source and fanned out to every observer.
///
/// Cloneable so one failure can be delivered to many listeners; causes that
/// are not `Clone` themselves are shared behind an `Arc`.
#[derive(Error, Diagnostic, Debug, Clone)]
#[non_exhaustive]
pub enum SourceError {
    #[error("No data available from {source_type} source")]
    #[diagnostic(
        code(tether_core::not_found),
        help("The source has nothing stored for the requested params")
    )]
    NotFound { source_type: SourceType },

    #[error("IO error: {operation} failed")]
    #[diagnostic(
        code(tether_core::io_error),
        help("Check file permissions and disk space")
    )]
    Io {
        operation: String,
        #[source]
        cause: Arc<std::io::Error>,
    },

    #[error("Serialization error")]
    #[diagnostic(
        code(tether_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    Serialization {
        data_type: String,
        #[source]
        cause: Arc<serde_json::Error>,
    },

    #[error("Network request to {url} failed: {details}")]
    #[diagnostic(
        code(tether_core::network_error),
        help("Check connectivity and the remote endpoint")
    )]
    Network {
        url: String,
        status: Option<u16>,
        details: String,
    },

    #[error("Storage error in {backend}: {details}")]
    #[diagnostic(code(tether_core::storage_error))]
    Storage { backend: String, details: String },

    #[error("Fetch was cancelled")]
    #[diagnostic(code(tether_core::cancelled))]
    Cancelled,

    #[error("No source in the chain could be queried")]
    #[diagnostic(
        code(tether_core::no_source_available),
        help("Every source declined the request because it was busy or refused to refresh")
    )]
    NoSourceAvailable,

    #[error("All {attempted} sources failed")]
    #[diagnostic(code(tether_core::sources_exhausted))]
    Exhausted {
        attempted: usize,
        #[source]
        last: Box<SourceError>,
    },

    #[error("{0}")]
    #[diagnostic(code(tether_core::other))]
    Other(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Network { .. } => ErrorKind::Network,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NoSourceAvailable => ErrorKind::Unavailable,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    pub fn not_found(source_type: SourceType) -> Self {
        Self::NotFound { source_type }
    }

    pub fn io(operation: impl Into<String>, cause: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            cause: Arc::new(cause),
        }
    }

    pub fn serialization(data_type: impl Into<String>, cause: serde_json::Error) -> Self {
        Self::Serialization {
            data_type: data_type.into(),
            cause: Arc::new(cause),
        }
    }

    pub fn network(url: impl Into<String>, status: Option<u16>, details: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            status,
            details: details.into(),
        }
    }

    pub fn storage(backend: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Storage {
            backend: backend.into(),
            details: details.into(),
        }
    }

    pub fn other(details: impl Into<String>) -> Self {
        Self::Other(details.into())
    }

    /// Turn a caught panic payload into a deliverable failure.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Other(format!("panicked: {message}"))
    }

    /// True for "nothing stored" results, which chains treat as a miss rather
    /// than a failure worth surfacing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error("Controller '{name}' is misconfigured")]
    #[diagnostic(
        code(tether_core::controller_config),
        help("Provide every required component to the controller builder")
    )]
    ControllerConfig {
        name: String,
        #[source]
        cause: ConfigError,
    },

    #[error("Configuration error in '{config_path}'")]
    #[diagnostic(
        code(tether_core::configuration_error),
        help("Check configuration file at {config_path}")
    )]
    ConfigurationFile {
        config_path: String,
        #[source]
        cause: ConfigError,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
