use crate::environment::BuildEnvironmentInfo;
use crate::result::{BuildResult, ContractStatus};
use serde::{Deserialize, Serialize};

/// The persisted `artifacts.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsManifest {
    pub schema: String,
    pub tool: ToolInfo,
    pub build_environment: BuildEnvironmentInfo,
    pub build_options: RecordedBuildOptions,
    pub hash_algorithm: String,
    pub summary: ArtifactsSummary,

    /// One entry per selected contract, in discovery order.
    #[serde(default)]
    pub contracts: Vec<ContractEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

/// The subset of build options a verifier needs to re-run the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedBuildOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_contract: Option<String>,

    pub no_wasm_opt: bool,
    pub build_root_folder: String,
    pub toolchain: RecordedToolchain,
}

/// The compiler and optimizer command lines in effect. The optimizer is
/// recorded even when `no_wasm_opt` skipped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedToolchain {
    pub compiler: String,
    pub compiler_args: Vec<String>,
    pub wasm_target: String,
    pub optimizer: String,
    pub optimizer_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsSummary {
    pub total: u64,
    pub succeeded: u64,
    pub degraded: u64,
    pub failed: u64,
}

impl ArtifactsSummary {
    pub fn from_entries(entries: &[ContractEntry]) -> Self {
        let mut summary = Self {
            total: entries.len() as u64,
            ..Self::default()
        };
        for entry in entries {
            match entry.result.status {
                ContractStatus::Succeeded => summary.succeeded += 1,
                ContractStatus::Degraded => summary.degraded += 1,
                ContractStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.total > 0 && self.succeeded == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Project-relative path of the contract's `Cargo.toml`.
    pub manifest_path: String,

    #[serde(flatten)]
    pub result: BuildResult,
}
