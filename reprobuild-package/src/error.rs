use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    /// The document is not a valid source package. Fatal: nothing gets built.
    #[error("malformed package: {reason}")]
    Malformed { reason: String },

    #[error("refusing to materialize into {path}: {reason}")]
    UnsafeTarget { path: Utf8PathBuf, reason: String },

    #[error("non UTF-8 path under {root}: {path}")]
    NonUtf8Path { root: Utf8PathBuf, path: String },

    #[error("walk {root}: {message}")]
    Walk { root: Utf8PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encode package: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PackageError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        PackageError::Malformed {
            reason: reason.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, PackageError::Malformed { .. })
    }
}
