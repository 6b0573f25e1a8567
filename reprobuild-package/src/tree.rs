use crate::codec::decode;
use crate::error::PackageError;
use crate::package::{Metadata, PackageFile, SourcePackage};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

const VCS_DIR: &str = ".git";
const CARGO_OUTPUT_DIR: &str = "target";
const CARGO_MANIFEST: &str = "Cargo.toml";
const CACHEDIR_TAG: &str = "CACHEDIR.TAG";

/// Whether `dir` holds cargo build output rather than sources.
///
/// That is a directory tagged with `CACHEDIR.TAG`, or a `target` sitting
/// next to a `Cargo.toml`. A directory with its own `Cargo.toml` is a
/// crate, whatever its name.
pub fn is_cargo_output_dir(dir: &Path) -> bool {
    if dir.join(CARGO_MANIFEST).is_file() {
        return false;
    }
    if dir.join(CACHEDIR_TAG).is_file() {
        return true;
    }
    dir.file_name().is_some_and(|name| name == CARGO_OUTPUT_DIR)
        && dir
            .parent()
            .is_some_and(|parent| parent.join(CARGO_MANIFEST).is_file())
}

/// Controls what [`SourcePackage::from_directory`] picks up.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Absolute directories to leave out (output folders and the like).
    pub excluded_dirs: Vec<Utf8PathBuf>,
}

impl SourcePackage {
    /// Read and decode a package document from disk.
    pub fn from_file(path: &Utf8Path) -> Result<Self, PackageError> {
        let bytes = fs::read(path)?;
        decode(&bytes)
    }

    /// Pack every regular file under `root`, sorted by relative path.
    ///
    /// Symlinks are skipped: their targets may live outside the tree.
    pub fn from_directory(
        root: &Utf8Path,
        options: &PackOptions,
        metadata: Metadata,
    ) -> Result<Self, PackageError> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                if entry.file_name() == VCS_DIR || is_cargo_output_dir(entry.path()) {
                    return false;
                }
                !options
                    .excluded_dirs
                    .iter()
                    .any(|excluded| entry.path() == excluded.as_std_path())
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| PackageError::Walk {
                root: root.to_path_buf(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                if entry.file_type().is_symlink() {
                    debug!(path = %entry.path().display(), "skipping symlink");
                }
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(root.as_std_path())
                .map_err(|e| PackageError::Walk {
                    root: root.to_path_buf(),
                    message: e.to_string(),
                })?;
            let rel = Utf8Path::from_path(rel).ok_or_else(|| PackageError::NonUtf8Path {
                root: root.to_path_buf(),
                path: rel.display().to_string(),
            })?;
            let rel = rel
                .components()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("/");

            let content = fs::read(entry.path())?;
            files.push(PackageFile { path: rel, content });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root, files = files.len(), "packed directory");
        SourcePackage::new(files, metadata)
    }

    /// Unpack into `target_dir`.
    ///
    /// Destructive: `target_dir` is removed and recreated first, so only ever
    /// pass a dedicated scratch location. Running twice with the same package
    /// yields the same tree. File bytes are written verbatim.
    pub fn materialize(&self, target_dir: &Utf8Path) -> Result<(), PackageError> {
        check_materialize_target(target_dir)?;

        if target_dir.exists() {
            debug!(target = %target_dir, "clearing materialize target");
            fs::remove_dir_all(target_dir)?;
        }
        fs::create_dir_all(target_dir)?;

        for file in self.files() {
            let dest = target_dir.join(&file.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &file.content)?;
        }

        info!(
            target = %target_dir,
            files = self.files().len(),
            "materialized source package"
        );
        Ok(())
    }
}

/// Refuse targets whose removal would take more than a scratch directory
/// with it: the empty path, a filesystem root, or any directory that holds
/// the current working directory (`.`, `..`, ...).
fn check_materialize_target(target_dir: &Utf8Path) -> Result<(), PackageError> {
    let unsafe_target = |reason: &str| PackageError::UnsafeTarget {
        path: target_dir.to_path_buf(),
        reason: reason.to_string(),
    };
    if target_dir.as_str().trim().is_empty() {
        return Err(unsafe_target("empty path"));
    }
    if target_dir.parent().is_none() {
        return Err(unsafe_target("filesystem root"));
    }
    if !target_dir.exists() {
        return Ok(());
    }

    let resolved = target_dir.canonicalize_utf8()?;
    if resolved.parent().is_none() {
        return Err(unsafe_target("filesystem root"));
    }
    let cwd = std::env::current_dir()?.canonicalize()?;
    if cwd.starts_with(resolved.as_std_path()) {
        return Err(unsafe_target("contains the current directory"));
    }
    Ok(())
}
