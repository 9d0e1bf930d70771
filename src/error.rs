//! Error classification for the outer retry loop.
//!
//! Most failures (remote copy errors, SQL errors) are transient: the loop
//! backs off and retries the whole cycle, and the control file on disk
//! guarantees the retry resumes at the correct step. A small set of failures
//! must instead stop the process, because retrying them automatically could
//! duplicate or drop committed data. Those are modeled here and detected by
//! downcasting at the single retry point in `main`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that terminate the process instead of entering the retry loop.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Invalid or incomplete configuration, detected eagerly at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file the configuration points at does not exist.
    #[error("required file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// Local state can no longer be trusted. Carries explicit remediation
    /// guidance for the operator; the process refuses to auto-retry.
    #[error("{message}\nremediation: {remediation}")]
    Unrecoverable { message: String, remediation: String },
}

impl FatalError {
    pub fn config(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(FatalError::Config(msg.into()))
    }

    pub fn unrecoverable(
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> anyhow::Error {
        anyhow::Error::new(FatalError::Unrecoverable {
            message: message.into(),
            remediation: remediation.into(),
        })
    }
}

/// Whether any error in the chain is fatal.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<FatalError>().is_some())
}
