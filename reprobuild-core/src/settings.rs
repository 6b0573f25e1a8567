//! Clap-free settings for the build pipeline.

use crate::error::PipelineError;
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;

/// Root path, inside the build sandbox, that project paths are remapped to.
pub const DEFAULT_BUILD_ROOT: &str = "/tmp/sc-build";

/// Per-invocation limit for compiler and optimizer runs.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const DEFAULT_WASM_TARGET: &str = "wasm32-unknown-unknown";

/// File name of the manifest written into the output directory.
pub const ARTIFACTS_FILE_NAME: &str = "artifacts.json";

/// Options controlling discovery and per-contract builds.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Build only this contract; its absence is an error.
    pub specific_contract: Option<String>,

    /// Scratch directory for compiler output, exclusively owned by one run.
    /// Must not live inside the project tree.
    pub cargo_target_dir: Utf8PathBuf,

    pub no_wasm_opt: bool,

    /// Absolute path the project root is remapped to in compiled output.
    pub build_root_folder: Utf8PathBuf,

    /// Upper bound on concurrently running contract builds.
    pub jobs: usize,

    pub timeout: Duration,
}

impl BuildOptions {
    pub fn new(cargo_target_dir: Utf8PathBuf) -> Self {
        Self {
            specific_contract: None,
            cargo_target_dir,
            no_wasm_opt: false,
            build_root_folder: Utf8PathBuf::from(DEFAULT_BUILD_ROOT),
            jobs: 1,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reject option combinations that would make a run unsafe or
    /// non-reproducible.
    pub fn validate(&self, project_root: &Utf8Path) -> Result<(), PipelineError> {
        if self.jobs == 0 {
            return Err(PipelineError::invalid_options("jobs must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(PipelineError::invalid_options("timeout must be positive"));
        }
        if let Some(name) = &self.specific_contract
            && name.trim().is_empty()
        {
            return Err(PipelineError::invalid_options("contract name is empty"));
        }
        if !self.build_root_folder.is_absolute() {
            return Err(PipelineError::invalid_options(format!(
                "build root {} must be an absolute path",
                self.build_root_folder
            )));
        }
        if self.cargo_target_dir.as_str().trim().is_empty() {
            return Err(PipelineError::invalid_options("cargo target dir is empty"));
        }

        let project = resolve_path(project_root)?;
        let target = resolve_path(&self.cargo_target_dir)?;
        if target.starts_with(&project) {
            return Err(PipelineError::invalid_options(format!(
                "cargo target dir {} is inside the project {}; \
                 its contents would be packaged and hashed",
                self.cargo_target_dir, project_root
            )));
        }
        Ok(())
    }
}

/// Compiler and optimizer command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainSettings {
    pub compiler: String,
    /// Leading arguments; `--target`, `--manifest-path` and `--target-dir`
    /// are appended per contract.
    pub compiler_args: Vec<String>,
    pub wasm_target: String,
    pub optimizer: String,
    /// Leading arguments; `<input> -o <output>` is appended.
    pub optimizer_args: Vec<String>,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            compiler: "cargo".to_string(),
            compiler_args: vec![
                "build".to_string(),
                "--release".to_string(),
                "--locked".to_string(),
            ],
            wasm_target: DEFAULT_WASM_TARGET.to_string(),
            optimizer: "wasm-opt".to_string(),
            optimizer_args: vec!["-Oz".to_string(), "--strip-debug".to_string()],
        }
    }
}

/// Where the project comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSource {
    /// An existing directory, used in place.
    Directory(Utf8PathBuf),

    /// A packaged source document, materialized into `unwrap_dir` first.
    /// `unwrap_dir` is wiped: pass a dedicated scratch location.
    Packaged {
        package: Utf8PathBuf,
        unwrap_dir: Utf8PathBuf,
    },
}

/// Everything `run_build` needs.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub source: ProjectSource,
    /// Caller-owned directory receiving bytecode, source packages and the manifest.
    pub output_dir: Utf8PathBuf,
    pub options: BuildOptions,
    pub toolchain: ToolchainSettings,
    /// Write a per-contract source package next to its bytecode.
    pub package_sources: bool,
}

impl BuildSettings {
    pub fn new(source: ProjectSource, output_dir: Utf8PathBuf, options: BuildOptions) -> Self {
        Self {
            source,
            output_dir,
            options,
            toolchain: ToolchainSettings::default(),
            package_sources: true,
        }
    }
}

/// Absolute, symlink-resolved form of `path`, also for paths that do not
/// exist yet (the deepest existing ancestor is canonicalized).
pub(crate) fn resolve_path(path: &Utf8Path) -> Result<Utf8PathBuf, PipelineError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| PipelineError::Internal(anyhow::anyhow!("current dir: {e}")))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|p| {
            PipelineError::invalid_options(format!("non UTF-8 working directory {}", p.display()))
        })?;
        cwd.join(path)
    };
    let absolute = normalize_lexically(&absolute);

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize_utf8() {
            let mut resolved = canonical;
            for part in rest.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

fn normalize_lexically(path: &Utf8Path) -> Utf8PathBuf {
    use camino::Utf8Component;

    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_str()),
        }
    }
    out
}
