//! Collection and persistence of the artifacts manifest.

use crate::error::PipelineError;
use crate::ports::WritePort;
use crate::settings::{BuildOptions, ToolchainSettings};
use camino::Utf8Path;
use reprobuild_hash::HASH_ALGORITHM;
use reprobuild_types::artifacts::{
    ArtifactsManifest, ArtifactsSummary, ContractEntry, RecordedBuildOptions, RecordedToolchain,
    ToolInfo,
};
use reprobuild_types::contract::Contract;
use reprobuild_types::environment::BuildEnvironmentInfo;
use reprobuild_types::result::{BuildResult, ContractFailure, FailureKind};
use reprobuild_types::schema::REPROBUILD_ARTIFACTS_V1;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Every selected contract with its result, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactsOutcome {
    manifest: ArtifactsManifest,
}

impl ArtifactsOutcome {
    /// Pair `contracts` with `results` by name.
    ///
    /// A contract without a result is recorded as failed; results for
    /// contracts that were not selected are dropped. Each contract appears
    /// exactly once.
    pub fn collect(
        contracts: &[Contract],
        results: Vec<(String, BuildResult)>,
        environment: BuildEnvironmentInfo,
        options: &BuildOptions,
        toolchain: &ToolchainSettings,
        tool: ToolInfo,
    ) -> Self {
        let mut by_name: BTreeMap<String, BuildResult> = BTreeMap::new();
        for (name, result) in results {
            if by_name.contains_key(&name) {
                warn!(contract = %name, "dropping duplicate build result");
                continue;
            }
            by_name.insert(name, result);
        }

        let entries: Vec<ContractEntry> = contracts
            .iter()
            .map(|contract| {
                let result = by_name.remove(&contract.name).unwrap_or_else(|| {
                    BuildResult::failed(
                        ContractFailure::new(FailureKind::BuildFailed, "no build result recorded"),
                        Vec::new(),
                    )
                });
                ContractEntry {
                    name: contract.name.clone(),
                    version: contract.version.clone(),
                    manifest_path: contract.relative_manifest_path.clone(),
                    result,
                }
            })
            .collect();

        for name in by_name.keys() {
            warn!(contract = %name, "dropping result for unselected contract");
        }

        let manifest = ArtifactsManifest {
            schema: REPROBUILD_ARTIFACTS_V1.to_string(),
            tool,
            build_environment: environment,
            build_options: RecordedBuildOptions {
                specific_contract: options.specific_contract.clone(),
                no_wasm_opt: options.no_wasm_opt,
                build_root_folder: options.build_root_folder.to_string(),
                toolchain: RecordedToolchain {
                    compiler: toolchain.compiler.clone(),
                    compiler_args: toolchain.compiler_args.clone(),
                    wasm_target: toolchain.wasm_target.clone(),
                    optimizer: toolchain.optimizer.clone(),
                    optimizer_args: toolchain.optimizer_args.clone(),
                },
            },
            hash_algorithm: HASH_ALGORITHM.to_string(),
            summary: ArtifactsSummary::from_entries(&entries),
            contracts: entries,
        };
        Self { manifest }
    }

    pub fn manifest(&self) -> &ArtifactsManifest {
        &self.manifest
    }

    pub fn summary(&self) -> ArtifactsSummary {
        self.manifest.summary
    }

    /// Whether every selected contract fully succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.manifest.summary.all_succeeded()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec_pretty(&self.manifest)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Write the manifest to `path` in one atomic step.
    pub fn save(&self, path: &Utf8Path, writer: &dyn WritePort) -> Result<(), PipelineError> {
        let persistence = |message: String| PipelineError::PersistenceError {
            path: path.to_path_buf(),
            message,
        };
        let bytes = self.to_json().map_err(|e| persistence(e.to_string()))?;
        writer
            .write_file(path, &bytes)
            .map_err(|e| persistence(format!("{e:#}")))?;
        info!(path = %path, contracts = self.manifest.summary.total, "artifacts manifest saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FsWritePort, InMemoryWritePort};
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use reprobuild_types::result::{ArtifactRef, ContractStatus};

    fn contract(name: &str) -> Contract {
        Contract {
            name: name.to_string(),
            version: Some("0.1.0".to_string()),
            manifest_path: Utf8PathBuf::from(format!("/p/{name}/Cargo.toml")),
            relative_manifest_path: format!("{name}/Cargo.toml"),
            target_dir: Utf8PathBuf::from(format!("/t/{name}")),
            manifest_error: None,
        }
    }

    fn succeeded(hash: &str) -> BuildResult {
        let mut result = BuildResult {
            status: ContractStatus::Failed,
            raw: Some(ArtifactRef {
                path: Utf8PathBuf::from("x/x.wasm"),
                sha256: hash.to_string(),
                size: 1,
            }),
            optimized: None,
            codehash: None,
            source_package: None,
            invocations: Vec::new(),
            failures: Vec::new(),
        };
        result.refresh_status();
        result
    }

    fn tool() -> ToolInfo {
        ToolInfo {
            name: "reprobuild".to_string(),
            version: "0.2.0".to_string(),
        }
    }

    #[test]
    fn collect_keeps_discovery_order_and_fills_gaps() {
        let contracts = vec![contract("a"), contract("b"), contract("c")];
        let results = vec![
            ("c".to_string(), succeeded("cc")),
            ("ghost".to_string(), succeeded("gg")),
            ("a".to_string(), succeeded("aa")),
        ];
        let outcome = ArtifactsOutcome::collect(
            &contracts,
            results,
            BuildEnvironmentInfo::default(),
            &BuildOptions::new(Utf8PathBuf::from("/t")),
            &ToolchainSettings::default(),
            tool(),
        );

        let manifest = outcome.manifest();
        let names: Vec<&str> = manifest.contracts.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(manifest.contracts[1].result.status, ContractStatus::Failed);
        assert_eq!(
            manifest.summary,
            ArtifactsSummary {
                total: 3,
                succeeded: 2,
                degraded: 0,
                failed: 1
            }
        );
        assert!(!outcome.all_succeeded());
        assert_eq!(manifest.hash_algorithm, "sha256");
        assert_eq!(manifest.schema, REPROBUILD_ARTIFACTS_V1);
        assert_eq!(manifest.build_options.toolchain.compiler, "cargo");
        assert_eq!(
            manifest.build_options.toolchain.wasm_target,
            "wasm32-unknown-unknown"
        );
    }

    #[test]
    fn save_writes_pretty_json_once() {
        let outcome = ArtifactsOutcome::collect(
            &[contract("a")],
            vec![("a".to_string(), succeeded("aa"))],
            BuildEnvironmentInfo::default(),
            &BuildOptions::new(Utf8PathBuf::from("/t")),
            &ToolchainSettings::default(),
            tool(),
        );
        assert!(outcome.all_succeeded());

        let writer = InMemoryWritePort::new();
        let path = Utf8Path::new("/out/artifacts.json");
        outcome.save(path, &writer).unwrap();
        let bytes = writer.get(path).unwrap();
        assert!(bytes.ends_with(b"}\n"));
        let parsed: ArtifactsManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(&parsed, outcome.manifest());
    }

    #[test]
    fn save_failure_is_persistence_error() {
        struct FailingWriter;
        impl WritePort for FailingWriter {
            fn write_file(&self, _: &Utf8Path, _: &[u8]) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }
            fn create_dir_all(&self, _: &Utf8Path) -> anyhow::Result<()> {
                Ok(())
            }
            fn remove_file(&self, _: &Utf8Path) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let outcome = ArtifactsOutcome::collect(
            &[contract("a")],
            Vec::new(),
            BuildEnvironmentInfo::default(),
            &BuildOptions::new(Utf8PathBuf::from("/t")),
            &ToolchainSettings::default(),
            tool(),
        );
        let err = outcome
            .save(Utf8Path::new("/out/artifacts.json"), &FailingWriter)
            .unwrap_err();
        assert_eq!(err.code(), "persistence_error");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn interrupted_save_keeps_previous_manifest() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let contracts = [contract("a")];
        let options = BuildOptions::new(Utf8PathBuf::from("/t"));
        let toolchain = ToolchainSettings::default();

        let previous = ArtifactsOutcome::collect(
            &contracts,
            vec![("a".to_string(), succeeded("aa"))],
            BuildEnvironmentInfo::default(),
            &options,
            &toolchain,
            tool(),
        );
        let good_path = out.join(crate::settings::ARTIFACTS_FILE_NAME);
        previous.save(&good_path, &FsWritePort).unwrap();
        let before = std::fs::read(&good_path).unwrap();

        // The rename step cannot replace a non-empty directory, so the temp
        // file is written and then the final step fails.
        let blocked = out.join("blocked.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();
        let next = ArtifactsOutcome::collect(
            &contracts,
            Vec::new(),
            BuildEnvironmentInfo::default(),
            &options,
            &toolchain,
            tool(),
        );
        let err = next.save(&blocked, &FsWritePort).unwrap_err();
        assert_eq!(err.code(), "persistence_error");
        assert!(blocked.is_dir());

        let err = next
            .save(&good_path.join("nested.json"), &FsWritePort)
            .unwrap_err();
        assert_eq!(err.code(), "persistence_error");

        assert_eq!(std::fs::read(&good_path).unwrap(), before);
        let mut names: Vec<String> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["artifacts.json".to_string(), "blocked.json".to_string()]);
    }
}
