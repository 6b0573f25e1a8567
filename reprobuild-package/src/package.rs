use crate::codec::validate_relative_path;
use crate::error::PackageError;
use reprobuild_types::package::metadata_keys;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One file of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Validated relative path, forward slashes.
    pub path: String,
    pub content: Vec<u8>,
}

/// Free-form configuration carried alongside the files.
///
/// Values may be any JSON; lookups by string only see string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self(entries)
    }

    /// Pure lookup with fallback; never an error. Non-string values fall
    /// back too.
    pub fn get<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.0.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// The recorded build root: `build_root_folder`, else the nested
    /// `buildOptions.buildRootFolder`.
    pub fn build_root_folder(&self) -> Option<&str> {
        self.0
            .get(metadata_keys::BUILD_ROOT_FOLDER)
            .and_then(Value::as_str)
            .or_else(|| {
                self.0
                    .get(metadata_keys::LEGACY_BUILD_OPTIONS)?
                    .get(metadata_keys::LEGACY_BUILD_ROOT_FOLDER)?
                    .as_str()
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePackage {
    files: Vec<PackageFile>,
    metadata: Metadata,
}

impl SourcePackage {
    /// Build a package, rejecting unsafe or duplicate paths.
    pub fn new(files: Vec<PackageFile>, metadata: Metadata) -> Result<Self, PackageError> {
        let mut seen = BTreeSet::new();
        for file in &files {
            validate_relative_path(&file.path)
                .map_err(|reason| PackageError::malformed(format!("{}: {}", file.path, reason)))?;
            if !seen.insert(file.path.as_str()) {
                return Err(PackageError::malformed(format!(
                    "duplicate path {}",
                    file.path
                )));
            }
        }
        Ok(Self { files, metadata })
    }

    pub fn files(&self) -> &[PackageFile] {
        &self.files
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.content.len() as u64).sum()
    }

    /// Files keyed by path; handy for order-insensitive comparisons.
    pub fn file_map(&self) -> BTreeMap<&str, &[u8]> {
        self.files
            .iter()
            .map(|f| (f.path.as_str(), f.content.as_slice()))
            .collect()
    }
}
