//! Per-contract source packages written next to the bytecode, so a
//! verifier can re-run the exact build from the published artifacts.

use crate::ports::WritePort;
use camino::{Utf8Path, Utf8PathBuf};
use reprobuild_hash::sha256_hex;
use reprobuild_package::{Metadata, PackOptions, PackageError, SourcePackage, encode};
use reprobuild_types::contract::Contract;
use reprobuild_types::package::metadata_keys;
use reprobuild_types::result::{ArtifactRef, ContractFailure, FailureKind};
use tracing::{debug, info};

const UNVERSIONED: &str = "0.0.0";

/// The project tree, packed once per run.
#[derive(Debug, Clone)]
pub struct ProjectSources {
    package: SourcePackage,
}

impl ProjectSources {
    /// Pack `project_root`, leaving out `excluded_dirs` (output and scratch
    /// directories that may live inside it).
    pub fn pack(
        project_root: &Utf8Path,
        excluded_dirs: Vec<Utf8PathBuf>,
        build_root_folder: &Utf8Path,
    ) -> Result<Self, PackageError> {
        let mut metadata = Metadata::default();
        metadata.insert(metadata_keys::BUILD_ROOT_FOLDER, build_root_folder.as_str());
        let package =
            SourcePackage::from_directory(project_root, &PackOptions { excluded_dirs }, metadata)?;
        info!(
            root = %project_root,
            files = package.files().len(),
            bytes = package.total_bytes(),
            "packed project sources"
        );
        Ok(Self { package })
    }

    pub fn package(&self) -> &SourcePackage {
        &self.package
    }

    /// Write `<name>/<name>-<version>.source.json` under `output_dir`.
    pub fn write_for(
        &self,
        contract: &Contract,
        writer: &dyn WritePort,
        output_dir: &Utf8Path,
    ) -> Result<ArtifactRef, ContractFailure> {
        let version = contract.version.as_deref().unwrap_or(UNVERSIONED);
        let relative = source_package_path(contract);
        let mut package = self.package.clone();
        package
            .metadata_mut()
            .insert(metadata_keys::CONTRACT_NAME, contract.name.as_str());
        package
            .metadata_mut()
            .insert(metadata_keys::CONTRACT_VERSION, version);

        let bytes = encode(&package).map_err(|err| packaging_failed(err.to_string()))?;
        writer
            .write_file(&output_dir.join(&relative), &bytes)
            .map_err(|err| packaging_failed(format!("write {relative}: {err:#}")))?;
        debug!(contract = %contract.name, path = %relative, "source package written");

        Ok(ArtifactRef {
            path: Utf8PathBuf::from(relative),
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
        })
    }
}

/// `<name>/<name>-<version>.source.json`, relative to the output dir.
pub fn source_package_path(contract: &Contract) -> String {
    let version = contract.version.as_deref().unwrap_or(UNVERSIONED);
    format!("{0}/{0}-{1}.source.json", contract.name, version)
}

pub(crate) fn packaging_failed(message: impl Into<String>) -> ContractFailure {
    ContractFailure::new(FailureKind::PackagingFailed, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryWritePort;
    use reprobuild_package::decode;
    use tempfile::TempDir;

    fn contract(name: &str, version: Option<&str>) -> Contract {
        Contract {
            name: name.to_string(),
            version: version.map(str::to_string),
            manifest_path: Utf8PathBuf::from(format!("/p/{name}/Cargo.toml")),
            relative_manifest_path: format!("{name}/Cargo.toml"),
            target_dir: Utf8PathBuf::from(format!("/t/{name}")),
            manifest_error: None,
        }
    }

    #[test]
    fn packs_once_and_stamps_each_contract() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("adder/src")).unwrap();
        std::fs::write(root.join("adder/src/lib.rs"), b"// adder").unwrap();
        std::fs::create_dir_all(root.join("output")).unwrap();
        std::fs::write(root.join("output/artifacts.json"), b"{}").unwrap();

        let sources =
            ProjectSources::pack(&root, vec![root.join("output")], Utf8Path::new("/tmp/sc-build"))
                .unwrap();
        let paths: Vec<&str> = sources
            .package()
            .files()
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["adder/src/lib.rs"]);

        let writer = InMemoryWritePort::new();
        let artifact = sources
            .write_for(&contract("adder", Some("1.2.3")), &writer, Utf8Path::new("/out"))
            .unwrap();
        assert_eq!(artifact.path, "adder/adder-1.2.3.source.json");

        let bytes = writer
            .get(Utf8Path::new("/out/adder/adder-1.2.3.source.json"))
            .unwrap();
        assert_eq!(artifact.sha256, sha256_hex(&bytes));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata().get(metadata_keys::CONTRACT_NAME, ""), "adder");
        assert_eq!(decoded.metadata().get(metadata_keys::CONTRACT_VERSION, ""), "1.2.3");
        assert_eq!(
            decoded.metadata().get(metadata_keys::BUILD_ROOT_FOLDER, ""),
            "/tmp/sc-build"
        );
    }

    #[test]
    fn unversioned_contract_gets_placeholder() {
        let sources = ProjectSources {
            package: SourcePackage::default(),
        };
        let writer = InMemoryWritePort::new();
        let artifact = sources
            .write_for(&contract("x", None), &writer, Utf8Path::new("/out"))
            .unwrap();
        assert_eq!(artifact.path, "x/x-0.0.0.source.json");
    }
}
