//! Domain error kinds raised by the streaming core.
//!
//! These travel inside [`anyhow::Error`]; callers that need to branch on the kind use
//! `err.downcast_ref::<RastvecError>()`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RastvecError {
    /// Spatial-reference mismatch, malformed sink or invalid option. Raised before any mutation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Begin or commit of a sink transaction failed. Tiles committed earlier are kept.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A read-only handle and an update handle were held on the same resource.
    #[error("resource lifetime error: {0}")]
    ResourceLifetime(String),

    /// Removing an intermediate file failed. Never fatal.
    #[error("cleanup failed for {path}: {source}")]
    Cleanup { path: PathBuf, source: io::Error },
}

impl RastvecError {
    pub fn config(msg: impl Into<String>) -> Self {
        RastvecError::Configuration(msg.into())
    }
}

/// Returns the domain error kind carried by `err`, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<&RastvecError> {
    err.downcast_ref::<RastvecError>()
}
