use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reproducibility-relevant facts about the environment a build ran in.
///
/// Captured once at pipeline start and attached to the manifest as a whole.
/// Every field is optional: missing provenance never blocks a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironmentInfo {
    /// Compiler toolchain identifier, e.g. "rustc 1.86.0 (05f9846f8 2025-03-31)".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,

    /// Optimizer identifier, e.g. "wasm-opt version 123".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<String>,

    /// Container image identity (tag or digest) of the build sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl BuildEnvironmentInfo {
    pub fn is_empty(&self) -> bool {
        self.toolchain.is_none()
            && self.optimizer.is_none()
            && self.image.is_none()
            && self.extra.is_empty()
    }
}
