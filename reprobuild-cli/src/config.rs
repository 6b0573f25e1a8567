//! Configuration file loading for reprobuild.
//!
//! Discovers and loads `reprobuild.toml` from the project root, from the
//! root of a packaged source tree, or from the path given with `--config`,
//! and merges it with CLI arguments. CLI values win.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use reprobuild_core::settings::{
    DEFAULT_BUILD_ROOT, DEFAULT_TIMEOUT, ProjectSource, ToolchainSettings,
};
use reprobuild_package::SourcePackage;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "reprobuild.toml";

/// Top-level configuration from reprobuild.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReprobuildConfig {
    pub toolchain: ToolchainConfig,
    pub build: BuildConfig,
}

/// `[toolchain]`: compiler and optimizer command lines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    pub compiler: Option<String>,
    pub compiler_args: Option<Vec<String>>,
    pub wasm_target: Option<String>,
    pub optimizer: Option<String>,
    pub optimizer_args: Option<Vec<String>>,
}

/// `[build]`: defaults for the matching CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub build_root: Option<Utf8PathBuf>,
}

pub fn discover_config(project_root: &Utf8Path) -> Option<Utf8PathBuf> {
    let config_path = project_root.join(CONFIG_FILE_NAME);
    if config_path.is_file() {
        debug!("found config file at {}", config_path);
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path);
        None
    }
}

pub fn load_config(path: &Utf8Path) -> anyhow::Result<ReprobuildConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;
    parse_config(&contents).with_context(|| format!("parse config file {}", path))
}

pub fn parse_config(contents: &str) -> anyhow::Result<ReprobuildConfig> {
    let config: ReprobuildConfig = toml::from_str(contents).context("invalid TOML")?;
    Ok(config)
}

/// The `reprobuild.toml` at the root of a packaged source tree, if any.
///
/// An unreadable or malformed package yields `None`; the build pipeline
/// reports it with the package's own error.
pub fn packaged_config(package: &Utf8Path) -> anyhow::Result<Option<ReprobuildConfig>> {
    let decoded = match SourcePackage::from_file(package) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(package = %package, error = %err, "package not readable, skipping its config");
            return Ok(None);
        }
    };
    let Some(file) = decoded.files().iter().find(|f| f.path == CONFIG_FILE_NAME) else {
        debug!("no {} in package {}", CONFIG_FILE_NAME, package);
        return Ok(None);
    };
    debug!("found {} in package {}", CONFIG_FILE_NAME, package);
    let contents = std::str::from_utf8(&file.content)
        .with_context(|| format!("{CONFIG_FILE_NAME} in {package} is not UTF-8"))?;
    parse_config(contents)
        .with_context(|| format!("parse {CONFIG_FILE_NAME} packaged in {package}"))
        .map(Some)
}

/// Load an explicit config file, else the one shipped with the project
/// (its root directory, or the root of the package).
pub fn load_or_default(
    explicit: Option<&Utf8Path>,
    source: &ProjectSource,
) -> anyhow::Result<ReprobuildConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match source {
        ProjectSource::Directory(root) => match discover_config(root) {
            Some(path) => load_config(&path),
            None => Ok(ReprobuildConfig::default()),
        },
        ProjectSource::Packaged { package, .. } => {
            Ok(packaged_config(package)?.unwrap_or_default())
        }
    }
}

/// CLI values that override the config file when present.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub build_root: Option<Utf8PathBuf>,
}

/// Config file and CLI arguments, merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedConfig {
    pub toolchain: ToolchainSettings,
    pub jobs: usize,
    pub timeout: Duration,
    pub build_root: Utf8PathBuf,
}

pub struct ConfigMerger {
    config: ReprobuildConfig,
}

impl ConfigMerger {
    pub fn new(config: ReprobuildConfig) -> Self {
        Self { config }
    }

    pub fn merge(self, cli: CliOverrides) -> MergedConfig {
        let defaults = ToolchainSettings::default();
        let toolchain = self.config.toolchain;
        let build = self.config.build;

        MergedConfig {
            toolchain: ToolchainSettings {
                compiler: toolchain.compiler.unwrap_or(defaults.compiler),
                compiler_args: toolchain.compiler_args.unwrap_or(defaults.compiler_args),
                wasm_target: toolchain.wasm_target.unwrap_or(defaults.wasm_target),
                optimizer: toolchain.optimizer.unwrap_or(defaults.optimizer),
                optimizer_args: toolchain.optimizer_args.unwrap_or(defaults.optimizer_args),
            },
            jobs: cli.jobs.or(build.jobs).unwrap_or(1),
            timeout: cli
                .timeout_secs
                .or(build.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            build_root: cli
                .build_root
                .or(build.build_root)
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_BUILD_ROOT)),
        }
    }
}
