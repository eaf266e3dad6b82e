//! Error types for dockside-core

use dockside_provider::ProviderError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] dockside_config::ConfigError),

    #[error("Pulling {image} failed: {reason}")]
    PullRejected { image: String, reason: String },

    #[error("Can't connect to the container runtime. Is it installed/running? ({0})")]
    Connectivity(#[source] ProviderError),

    #[error("Container not ready after {attempts} attempt(s) ({waited:?} waited)")]
    NotReadyTimeout { attempts: u32, waited: Duration },

    #[error("Readiness probe failed: {0}")]
    Probe(String),

    #[error("Runtime operation '{operation}' failed: {source}")]
    RuntimeOperation {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Startup worker failed: {0}")]
    Worker(String),
}

/// Coarse classification of a [`HarnessError`], for callers that branch on
/// the kind of failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid input, or the registry refused the image
    Configuration,
    /// The runtime could not be reached at all
    Connectivity,
    /// The readiness probe never reported ready
    NotReadyTimeout,
    /// The probe itself failed
    Probe,
    /// Any other runtime failure, or a crashed startup worker
    RuntimeOperation,
    /// The controller was driven out of order
    Usage,
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::PullRejected { .. } => ErrorKind::Configuration,
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::NotReadyTimeout { .. } => ErrorKind::NotReadyTimeout,
            Self::Probe(_) => ErrorKind::Probe,
            Self::RuntimeOperation { .. } | Self::Worker(_) => ErrorKind::RuntimeOperation,
            Self::InvalidState(_) => ErrorKind::Usage,
        }
    }

    pub(crate) fn runtime(operation: &'static str) -> impl FnOnce(ProviderError) -> Self {
        move |source| Self::RuntimeOperation { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
