use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// One independently buildable unit of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Declared `[package].name`; unique within the project.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Absolute path to the contract's `Cargo.toml`.
    pub manifest_path: Utf8PathBuf,

    /// `manifest_path` relative to the project root, forward slashes.
    /// Discovery order is the lexicographic order of this field.
    pub relative_manifest_path: String,

    /// Exclusive scratch directory, `<cargo target dir>/<name>`.
    pub target_dir: Utf8PathBuf,

    /// Set when `Cargo.toml` could not be parsed. The name then falls back
    /// to the directory name and the contract is recorded as failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_error: Option<String>,
}

impl Contract {
    /// Directory holding the contract's `Cargo.toml`.
    pub fn dir(&self) -> Utf8PathBuf {
        self.manifest_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }

    /// File stem cargo gives the compiled library (`-` becomes `_`).
    pub fn artifact_stem(&self) -> String {
        self.name.replace('-', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(name: &str) -> Contract {
        Contract {
            name: name.to_string(),
            version: Some("0.1.0".to_string()),
            manifest_path: Utf8PathBuf::from("/project/contracts/adder/Cargo.toml"),
            relative_manifest_path: "contracts/adder/Cargo.toml".to_string(),
            target_dir: Utf8PathBuf::from("/target").join(name),
            manifest_error: None,
        }
    }

    #[test]
    fn artifact_stem_replaces_dashes() {
        assert_eq!(contract("multi-transfer-esdt").artifact_stem(), "multi_transfer_esdt");
        assert_eq!(contract("adder").artifact_stem(), "adder");
    }

    #[test]
    fn dir_is_manifest_parent() {
        assert_eq!(contract("adder").dir(), Utf8PathBuf::from("/project/contracts/adder"));
    }
}
