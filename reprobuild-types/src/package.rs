//! Wire shape of a packaged source tree (`*.source.json`).
//!
//! File content is base64 so arbitrary bytes survive untouched. Validation
//! (paths, duplicates, base64) lives in `reprobuild-package`; these types
//! only describe the document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known metadata keys.
pub mod metadata_keys {
    pub const BUILD_ROOT_FOLDER: &str = "build_root_folder";
    pub const CONTRACT_NAME: &str = "contract_name";
    pub const CONTRACT_VERSION: &str = "contract_version";

    /// Nested options object written by older packagers:
    /// `{"buildOptions": {"buildRootFolder": "..."}}`.
    pub const LEGACY_BUILD_OPTIONS: &str = "buildOptions";
    pub const LEGACY_BUILD_ROOT_FOLDER: &str = "buildRootFolder";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePackageDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Free-form; the codec never interprets it.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    pub entries: Vec<PackageEntryDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntryDocument {
    /// Relative path, forward slashes.
    pub path: String,

    /// Standard base64 of the file bytes.
    pub content: String,
}
