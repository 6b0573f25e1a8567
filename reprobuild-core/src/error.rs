//! Fatal pipeline errors.
//!
//! Per-contract problems (compiler failure, missing bytecode, optimizer
//! failure) are not errors at this level: they are recorded in that
//! contract's `BuildResult` and the run continues. Everything here aborts
//! the run before a manifest is written.

use crate::lock::LockError;
use camino::Utf8PathBuf;
use reprobuild_package::PackageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source package {path}: {source}")]
    MalformedPackage {
        path: Utf8PathBuf,
        #[source]
        source: PackageError,
    },

    #[error("contract {name:?} not found (available: {available})")]
    ContractNotFound { name: String, available: String },

    #[error("no contracts found under {root}")]
    NoContractsFound { root: Utf8PathBuf },

    #[error("contract name {name:?} is declared by both {first} and {second}")]
    DuplicateContract {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid build options: {reason}")]
    InvalidOptions { reason: String },

    #[error(transparent)]
    TargetDirLocked(#[from] LockError),

    /// The manifest could not be written. Always fatal: without it the run
    /// cannot be verified.
    #[error("persist artifacts manifest {path}: {message}")]
    PersistenceError { path: Utf8PathBuf, message: String },

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub(crate) fn invalid_options(reason: impl Into<String>) -> Self {
        PipelineError::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// Short stable token for logs and machine-readable CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::MalformedPackage { .. } => "malformed_package",
            PipelineError::ContractNotFound { .. } => "contract_not_found",
            PipelineError::NoContractsFound { .. } => "no_contracts_found",
            PipelineError::DuplicateContract { .. } => "duplicate_contract",
            PipelineError::InvalidOptions { .. } => "invalid_options",
            PipelineError::TargetDirLocked(_) => "target_dir_locked",
            PipelineError::PersistenceError { .. } => "persistence_error",
            PipelineError::Internal(_) => "internal",
        }
    }
}
