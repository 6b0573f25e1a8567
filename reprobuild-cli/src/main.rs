mod config;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{ArgGroup, Parser};
use config::{CliOverrides, ConfigMerger};
use reprobuild_core::adapters::{FsWritePort, ProcessCommandRunner, ProcessEnv};
use reprobuild_core::settings::{BuildOptions, BuildSettings, ProjectSource};
use reprobuild_core::{BuildRun, ToolInfo, run_build};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "reprobuild",
    version,
    about = "Reproducible, verifiable WebAssembly builds for contract workspaces."
)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["project", "packaged_src"])
))]
struct Cli {
    /// Project directory to build in place.
    #[arg(long)]
    project: Option<Utf8PathBuf>,

    /// Source package document to unwrap and build.
    #[arg(long, requires = "unwrap_dir")]
    packaged_src: Option<Utf8PathBuf>,

    /// Scratch directory the package is unwrapped into. Wiped first.
    #[arg(long, requires = "packaged_src")]
    unwrap_dir: Option<Utf8PathBuf>,

    /// Build only this contract.
    #[arg(long)]
    contract: Option<String>,

    /// Output directory for bytecode, source packages and artifacts.json.
    #[arg(long)]
    output: Utf8PathBuf,

    /// Skip the optimizer; only raw bytecode is produced.
    #[arg(long, default_value_t = false)]
    no_wasm_opt: bool,

    /// Scratch directory for compiler output. Must be outside the project.
    #[arg(long, env = "REPROBUILD_CARGO_TARGET_DIR")]
    cargo_target_dir: Utf8PathBuf,

    /// Path the project root is remapped to in compiled output
    /// (default: /tmp/sc-build, or the package's recorded build root).
    #[arg(long)]
    build_root: Option<Utf8PathBuf>,

    /// Number of contracts built concurrently (default: 1).
    #[arg(long, env = "REPROBUILD_JOBS")]
    jobs: Option<usize>,

    /// Per-invocation timeout for compiler and optimizer (default: 1800).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Config file (default: reprobuild.toml at the project or package root,
    /// when present).
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Do not write per-contract source packages.
    #[arg(long, default_value_t = false)]
    no_source_packages: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match real_main(cli) {
        Ok(run) => ExitCode::from(run.exit_code() as u8),
        Err(e) => {
            error!("{:?}", e);
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn real_main(cli: Cli) -> anyhow::Result<BuildRun> {
    let settings = build_settings(&cli)?;
    debug!(?settings, "resolved settings");

    let tool = ToolInfo {
        name: "reprobuild".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let run = run_build(
        &settings,
        &ProcessCommandRunner::default(),
        &ProcessEnv,
        &FsWritePort,
        tool,
    )?;

    print_summary(&run);
    Ok(run)
}

fn build_settings(cli: &Cli) -> anyhow::Result<BuildSettings> {
    let source = match (&cli.project, &cli.packaged_src, &cli.unwrap_dir) {
        (Some(project), None, _) => ProjectSource::Directory(project.clone()),
        (None, Some(package), Some(unwrap_dir)) => ProjectSource::Packaged {
            package: package.clone(),
            unwrap_dir: unwrap_dir.clone(),
        },
        _ => anyhow::bail!("pass either --project, or --packaged-src with --unwrap-dir"),
    };

    let config =
        config::load_or_default(cli.config.as_deref(), &source).context("load configuration")?;
    let merged = ConfigMerger::new(config).merge(CliOverrides {
        jobs: cli.jobs,
        timeout_secs: cli.timeout_secs,
        build_root: cli.build_root.clone(),
    });

    let mut options = BuildOptions::new(cli.cargo_target_dir.clone());
    options.specific_contract = cli.contract.clone();
    options.no_wasm_opt = cli.no_wasm_opt;
    options.build_root_folder = merged.build_root;
    options.jobs = merged.jobs;
    options.timeout = merged.timeout;

    let mut settings = BuildSettings::new(source, cli.output.clone(), options);
    settings.toolchain = merged.toolchain;
    settings.package_sources = !cli.no_source_packages;
    Ok(settings)
}

fn print_summary(run: &BuildRun) {
    let manifest = run.outcome.manifest();
    for entry in &manifest.contracts {
        let hash = entry.result.codehash.as_deref().unwrap_or("-");
        println!("{:<10} {:<32} {}", entry.result.status.as_str(), entry.name, hash);
        for failure in &entry.result.failures {
            println!("           {}", failure.message);
        }
    }
    let summary = manifest.summary;
    println!(
        "{} contract(s): {} succeeded, {} degraded, {} failed",
        summary.total, summary.succeeded, summary.degraded, summary.failed
    );
    println!("artifacts: {}", run.manifest_path);
}
