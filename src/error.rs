//! Provisioning error taxonomy.
//!
//! Every error is fatal to a provisioning run. The variant decides the
//! process exit status so callers can tell configuration mistakes apart
//! from network trouble and identity clashes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating or executing a provisioning plan.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Invalid configuration, caught before anything is mutated.
    #[error("configuration error: {0}")]
    Config(String),

    /// Base image or package index could not be fetched.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The package manager failed to install the requested set.
    #[error("install error: {0}")]
    Install(String),

    /// Requested UID/GID cannot be used inside the environment.
    #[error("identity error: {0}")]
    Identity(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn install(msg: impl Into<String>) -> Self {
        Self::Install(msg.into())
    }

    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Fetch(_) | Self::Install(_) => 3,
            Self::Identity(_) => 4,
            Self::Io { .. } => 1,
        }
    }
}

/// Pick the exit status for an error chain coming out of a command.
///
/// The first `ProvisionError` found in the chain wins; anything else is 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProvisionError>())
        .map(ProvisionError::exit_code)
        .unwrap_or(1)
}
