//! Contract discovery in a multi-contract workspace.

use crate::error::PipelineError;
use crate::settings::{BuildOptions, resolve_path};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use reprobuild_package::is_cargo_output_dir;
use reprobuild_types::contract::Contract;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Descriptor file marking a directory as a contract unit (next to its `Cargo.toml`).
pub const CONTRACT_MARKER: &str = "dharitri.json";

const CARGO_MANIFEST: &str = "Cargo.toml";
const VCS_DIR: &str = ".git";
const META_CRATE_DIR: &str = "meta";

/// Enumerate the contracts under `project_root`, sorted by project-relative
/// manifest path, with `options.specific_contract` applied.
///
/// Reads the tree only; nothing is written.
pub fn discover(
    project_root: &Utf8Path,
    options: &BuildOptions,
) -> Result<Vec<Contract>, PipelineError> {
    let root = resolve_path(project_root)?;
    let target_dir = resolve_path(&options.cargo_target_dir)?;

    let mut contracts = Vec::new();
    let walker = WalkDir::new(root.as_std_path())
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() || entry.depth() == 0 {
                return true;
            }
            !is_skipped_dir(entry.path(), &target_dir)
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("walk project tree {}", root))?;
        if !entry.file_type().is_file() || entry.file_name() != CARGO_MANIFEST {
            continue;
        }
        let Some(manifest_path) = Utf8Path::from_path(entry.path()) else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 path");
            continue;
        };
        let Some(dir) = manifest_path.parent() else {
            continue;
        };
        if !dir.join(CONTRACT_MARKER).is_file() {
            continue;
        }
        contracts.push(read_contract(&root, manifest_path, dir, &target_dir)?);
    }

    contracts.sort_by(|a, b| a.relative_manifest_path.cmp(&b.relative_manifest_path));
    check_unique_names(&contracts)?;
    info!(root = %root, count = contracts.len(), "discovered contracts");

    match &options.specific_contract {
        Some(wanted) => {
            let selected: Vec<Contract> = contracts
                .iter()
                .filter(|c| &c.name == wanted)
                .cloned()
                .collect();
            if selected.is_empty() {
                return Err(PipelineError::ContractNotFound {
                    name: wanted.clone(),
                    available: contracts
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
            Ok(selected)
        }
        None if contracts.is_empty() => Err(PipelineError::NoContractsFound { root }),
        None => Ok(contracts),
    }
}

fn is_skipped_dir(path: &std::path::Path, target_dir: &Utf8Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name == VCS_DIR || path == target_dir.as_std_path() || is_cargo_output_dir(path) {
        return true;
    }
    // A contract's `meta` crate is build tooling, not a contract.
    name == META_CRATE_DIR
        && path
            .parent()
            .is_some_and(|parent| parent.join(CONTRACT_MARKER).is_file())
}

fn read_contract(
    root: &Utf8Path,
    manifest_path: &Utf8Path,
    dir: &Utf8Path,
    cargo_target_dir: &Utf8Path,
) -> Result<Contract, PipelineError> {
    let relative_manifest_path = manifest_path
        .strip_prefix(root)
        .map(|p| {
            p.components()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_else(|_| manifest_path.to_string());

    let text = fs::read_to_string(manifest_path)
        .with_context(|| format!("read contract manifest {}", manifest_path))?;

    let (name, version, manifest_error) = match parse_package(&text) {
        Ok((name, version)) => (name, version, None),
        Err(reason) => {
            let fallback = dir.file_name().unwrap_or("contract").to_string();
            warn!(manifest = %relative_manifest_path, %reason, "unparsable contract manifest");
            (fallback, None, Some(reason))
        }
    };

    debug!(contract = %name, manifest = %relative_manifest_path, "found contract");
    Ok(Contract {
        target_dir: contract_target_dir(cargo_target_dir, &name),
        name,
        version,
        manifest_path: manifest_path.to_path_buf(),
        relative_manifest_path,
        manifest_error,
    })
}

/// `[package].name` and string `[package].version` of a `Cargo.toml`.
fn parse_package(text: &str) -> Result<(String, Option<String>), String> {
    let table: toml::Table = text.parse().map_err(|e: toml::de::Error| e.message().to_string())?;
    let package = table
        .get("package")
        .and_then(toml::Value::as_table)
        .ok_or_else(|| "missing [package] table".to_string())?;
    let name = package
        .get("name")
        .and_then(toml::Value::as_str)
        .ok_or_else(|| "missing [package].name".to_string())?;
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(format!("invalid package name {name:?}"));
    }
    let version = package
        .get("version")
        .and_then(toml::Value::as_str)
        .map(str::to_string);
    Ok((name.to_string(), version))
}

fn check_unique_names(contracts: &[Contract]) -> Result<(), PipelineError> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for contract in contracts {
        if let Some(first) = seen.insert(&contract.name, &contract.relative_manifest_path) {
            return Err(PipelineError::DuplicateContract {
                name: contract.name.clone(),
                first: first.to_string(),
                second: contract.relative_manifest_path.clone(),
            });
        }
    }
    Ok(())
}

/// Exclusive scratch directory for contract `name`.
pub fn contract_target_dir(cargo_target_dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    cargo_target_dir.join(name)
}
