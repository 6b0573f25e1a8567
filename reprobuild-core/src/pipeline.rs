//! The build pipeline, extracted from the CLI.
//!
//! I/O-agnostic: subprocesses, the environment and output writes all go
//! through the port traits.

use crate::discovery::discover;
use crate::environment::capture_from_environment;
use crate::error::PipelineError;
use crate::executor::BuildExecutor;
use crate::lock::TargetDirLock;
use crate::outcome::ArtifactsOutcome;
use crate::ports::{CommandRunner, EnvSource, WritePort};
use crate::postprocess::WasmPostProcessor;
use crate::settings::{
    ARTIFACTS_FILE_NAME, BuildOptions, BuildSettings, ProjectSource, resolve_path,
};
use crate::sources::{ProjectSources, packaging_failed, source_package_path};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use reprobuild_package::{PackageError, SourcePackage};
use reprobuild_types::artifacts::ToolInfo;
use reprobuild_types::contract::Contract;
use reprobuild_types::result::{BuildResult, ContractStatus};
use tracing::{debug, info, warn};

/// A finished run whose manifest was persisted.
#[derive(Debug, Clone)]
pub struct BuildRun {
    pub outcome: ArtifactsOutcome,
    pub manifest_path: Utf8PathBuf,
    pub project_root: Utf8PathBuf,
}

impl BuildRun {
    /// 0 when every selected contract succeeded, 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.outcome.all_succeeded() { 0 } else { 2 }
    }
}

/// Build every selected contract and persist `artifacts.json`.
///
/// Per-contract failures end up in the manifest. An `Err` means the run
/// was aborted and no manifest was written.
pub fn run_build(
    settings: &BuildSettings,
    runner: &dyn CommandRunner,
    env: &dyn EnvSource,
    writer: &dyn WritePort,
    tool: ToolInfo,
) -> Result<BuildRun, PipelineError> {
    let mut options = settings.options.clone();
    let project = plan_project(&settings.source, &mut options, &settings.output_dir)?;
    let project_root = resolve_path(&project.root)?;
    options.cargo_target_dir = resolve_path(&options.cargo_target_dir)?;
    let output_dir = resolve_path(&settings.output_dir)?;
    options.validate(&project_root)?;

    let environment = capture_from_environment(env);
    debug!(?environment, "captured build environment");

    // Held before the unwrap dir is touched: a locked-out run must leave
    // the running build's sources alone.
    let lock = TargetDirLock::acquire(
        &options.cargo_target_dir,
        &format!("{} {}", tool.name, project_root),
    )?;
    debug!(lock = %lock.path(), "target dir locked");

    if let Some(package) = &project.package {
        unwrap_package(package, &project_root)?;
    }

    let contracts = discover(&project_root, &options)?;

    writer
        .create_dir_all(&output_dir)
        .map_err(|e| PipelineError::PersistenceError {
            path: output_dir.clone(),
            message: format!("{e:#}"),
        })?;

    let sources = if settings.package_sources {
        Some(
            ProjectSources::pack(
                &project_root,
                vec![output_dir.clone(), options.cargo_target_dir.clone()],
                &options.build_root_folder,
            )
            .map_err(|err| err.to_string()),
        )
    } else {
        None
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .thread_name(|i| format!("reprobuild-{i}"))
        .build()
        .context("create build worker pool")?;

    let executor = BuildExecutor::new(runner, &settings.toolchain, &project_root);
    let processor = WasmPostProcessor::new(runner, &settings.toolchain, writer, &output_dir);
    info!(
        contracts = contracts.len(),
        jobs = options.jobs,
        "building contracts"
    );

    let results: Vec<anyhow::Result<(String, BuildResult)>> = pool.install(|| {
        contracts
            .par_iter()
            .map(|contract| {
                let result = build_contract(
                    contract,
                    &options,
                    &executor,
                    &processor,
                    sources.as_ref(),
                    writer,
                    &output_dir,
                )?;
                Ok((contract.name.clone(), result))
            })
            .collect()
    });
    let results = results
        .into_iter()
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| PipelineError::PersistenceError {
            path: output_dir.clone(),
            message: format!("{e:#}"),
        })?;

    let outcome = ArtifactsOutcome::collect(
        &contracts,
        results,
        environment,
        &options,
        &settings.toolchain,
        tool,
    );
    let manifest_path = output_dir.join(ARTIFACTS_FILE_NAME);
    outcome.save(&manifest_path, writer)?;

    let summary = outcome.summary();
    info!(
        succeeded = summary.succeeded,
        degraded = summary.degraded,
        failed = summary.failed,
        "build finished"
    );

    Ok(BuildRun {
        outcome,
        manifest_path,
        project_root,
    })
}

/// Where the project will live, plus the decoded package still to be
/// unwrapped there.
struct ProjectPlan {
    root: Utf8PathBuf,
    package: Option<SourcePackage>,
}

/// Check the project source without touching the filesystem.
///
/// A package's recorded build root replaces the configured one.
fn plan_project(
    source: &ProjectSource,
    options: &mut BuildOptions,
    output_dir: &Utf8Path,
) -> Result<ProjectPlan, PipelineError> {
    match source {
        ProjectSource::Directory(dir) => {
            if !dir.is_dir() {
                return Err(PipelineError::invalid_options(format!(
                    "project directory {dir} does not exist"
                )));
            }
            Ok(ProjectPlan {
                root: dir.clone(),
                package: None,
            })
        }
        ProjectSource::Packaged {
            package,
            unwrap_dir,
        } => {
            let scratch = resolve_path(unwrap_dir)?;
            for (label, dir) in [
                ("output dir", output_dir),
                ("cargo target dir", options.cargo_target_dir.as_path()),
            ] {
                if resolve_path(dir)?.starts_with(&scratch) {
                    return Err(PipelineError::invalid_options(format!(
                        "{label} {dir} is inside the unwrap dir {unwrap_dir}, which is wiped"
                    )));
                }
            }

            let decoded = SourcePackage::from_file(package).map_err(|source| {
                PipelineError::MalformedPackage {
                    path: package.clone(),
                    source,
                }
            })?;

            if let Some(build_root) = decoded.metadata().build_root_folder()
                && build_root != options.build_root_folder.as_str()
            {
                info!(build_root = %build_root, "using build root from package metadata");
                options.build_root_folder = Utf8PathBuf::from(build_root);
            }

            Ok(ProjectPlan {
                root: unwrap_dir.clone(),
                package: Some(decoded),
            })
        }
    }
}

fn unwrap_package(package: &SourcePackage, unwrap_dir: &Utf8Path) -> Result<(), PipelineError> {
    package.materialize(unwrap_dir).map_err(|err| match err {
        PackageError::UnsafeTarget { .. } => PipelineError::invalid_options(err.to_string()),
        other => PipelineError::Internal(
            anyhow::Error::new(other).context(format!("unwrap into {unwrap_dir}")),
        ),
    })
}

fn build_contract(
    contract: &Contract,
    options: &BuildOptions,
    executor: &BuildExecutor<'_>,
    processor: &WasmPostProcessor<'_>,
    sources: Option<&Result<ProjectSources, String>>,
    writer: &dyn WritePort,
    output_dir: &Utf8Path,
) -> anyhow::Result<BuildResult> {
    processor
        .clear_previous(contract)
        .with_context(|| format!("clear previous outputs of {}", contract.name))?;
    writer.remove_file(&output_dir.join(source_package_path(contract)))?;

    let built = executor.build(contract, options);
    let mut result = match built.raw {
        Ok(raw) => {
            let processed = processor
                .process(contract, &raw, options)
                .with_context(|| format!("store bytecode of {}", contract.name))?;
            let mut invocations = built.invocations;
            invocations.extend(processed.invocations);
            BuildResult {
                status: ContractStatus::Succeeded,
                raw: Some(processed.raw),
                optimized: processed.optimized,
                codehash: None,
                source_package: None,
                invocations,
                failures: processed.failures,
            }
        }
        Err(failure) => BuildResult::failed(failure, built.invocations),
    };

    match sources {
        Some(Ok(sources)) => match sources.write_for(contract, writer, output_dir) {
            Ok(artifact) => result.source_package = Some(artifact),
            Err(failure) => result.failures.push(failure),
        },
        Some(Err(reason)) => result
            .failures
            .push(packaging_failed(format!("pack project sources: {reason}"))),
        None => {}
    }

    result.refresh_status();
    if result.status != ContractStatus::Succeeded {
        warn!(
            contract = %contract.name,
            status = result.status.as_str(),
            "contract did not fully succeed"
        );
    }
    Ok(result)
}
