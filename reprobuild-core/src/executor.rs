//! Isolated per-contract compilation.

use crate::output::{OUTPUT_TAIL_LIMIT, failure_tail};
use crate::ports::{CommandOutput, CommandRunner, Invocation};
use crate::settings::{BuildOptions, ToolchainSettings};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use reprobuild_types::contract::Contract;
use reprobuild_types::result::{ContractFailure, FailureKind, InvocationRecord, InvocationTool};
use std::collections::BTreeMap;
use std::io;
use tracing::{debug, info, warn};

/// Fixed timestamp handed to every build (1980-01-01T00:00:00Z).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Primary bytecode of one successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuild {
    pub path: Utf8PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub raw: Result<RawBuild, ContractFailure>,
    pub invocations: Vec<InvocationRecord>,
}

impl ExecutorOutcome {
    fn failed(failure: ContractFailure, invocations: Vec<InvocationRecord>) -> Self {
        Self {
            raw: Err(failure),
            invocations,
        }
    }
}

/// Runs the compiler for one contract inside its own target directory.
pub struct BuildExecutor<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a ToolchainSettings,
    project_root: &'a Utf8Path,
}

impl<'a> BuildExecutor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        toolchain: &'a ToolchainSettings,
        project_root: &'a Utf8Path,
    ) -> Self {
        Self {
            runner,
            toolchain,
            project_root,
        }
    }

    /// Where the compiler leaves the contract's bytecode.
    pub fn primary_bytecode_path(&self, contract: &Contract) -> Utf8PathBuf {
        contract
            .target_dir
            .join(&self.toolchain.wasm_target)
            .join("release")
            .join(format!("{}.wasm", contract.artifact_stem()))
    }

    /// The exact compiler command for `contract`.
    pub fn invocation(&self, contract: &Contract, options: &BuildOptions) -> Invocation {
        let mut args = self.toolchain.compiler_args.clone();
        args.extend([
            "--target".to_string(),
            self.toolchain.wasm_target.clone(),
            "--manifest-path".to_string(),
            contract.manifest_path.to_string(),
            "--target-dir".to_string(),
            contract.target_dir.to_string(),
        ]);

        let mut env = reproducible_env();
        env.insert(
            "CARGO_TARGET_DIR".to_string(),
            contract.target_dir.to_string(),
        );
        env.insert(
            "CARGO_ENCODED_RUSTFLAGS".to_string(),
            format!(
                "--remap-path-prefix={}={}",
                self.project_root, options.build_root_folder
            ),
        );

        Invocation {
            program: self.toolchain.compiler.clone(),
            args,
            working_dir: contract.dir(),
            env,
            timeout: options.timeout,
        }
    }

    /// Compile `contract`. Every problem is recorded in the outcome; nothing
    /// here aborts sibling builds.
    pub fn build(&self, contract: &Contract, options: &BuildOptions) -> ExecutorOutcome {
        if let Some(reason) = &contract.manifest_error {
            return ExecutorOutcome::failed(
                ContractFailure::new(
                    FailureKind::BuildFailed,
                    format!("unreadable {}: {reason}", contract.relative_manifest_path),
                ),
                Vec::new(),
            );
        }

        if let Err(err) = fs::create_dir_all(&contract.target_dir) {
            return ExecutorOutcome::failed(
                ContractFailure::new(FailureKind::BuildFailed, err.to_string()),
                Vec::new(),
            );
        }

        let primary = self.primary_bytecode_path(contract);
        if let Err(err) = remove_stale(&primary) {
            return ExecutorOutcome::failed(
                ContractFailure::new(
                    FailureKind::BuildFailed,
                    format!("remove stale bytecode: {err}"),
                ),
                Vec::new(),
            );
        }

        let invocation = self.invocation(contract, options);
        info!(contract = %contract.name, command = %invocation.display(), "building");
        let output = match self.runner.run(&invocation) {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    contract = %contract.name,
                    error = %format!("{err:#}"),
                    "compiler did not start"
                );
                return ExecutorOutcome::failed(
                    ContractFailure::new(
                        FailureKind::BuildFailed,
                        format!("failed to start compiler: {err:#}"),
                    ),
                    Vec::new(),
                );
            }
        };

        let invocations = vec![InvocationRecord {
            tool: InvocationTool::Compiler,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
        }];

        if output.timed_out {
            if let Err(err) = fs::remove_dir_all(&contract.target_dir) {
                warn!(contract = %contract.name, error = %err, "failed to reclaim target dir");
            }
            let failure = invocation_failure(
                FailureKind::BuildFailed,
                format!("compiler timed out after {}s", options.timeout.as_secs()),
                &output,
            );
            warn!(contract = %contract.name, "build timed out");
            return ExecutorOutcome::failed(failure, invocations);
        }

        if !output.success() {
            let failure = invocation_failure(
                FailureKind::BuildFailed,
                exit_message("compiler", &output),
                &output,
            );
            warn!(contract = %contract.name, exit_code = ?output.exit_code, "build failed");
            return ExecutorOutcome::failed(failure, invocations);
        }

        match fs::read(&primary) {
            Ok(bytes) => {
                debug!(
                    contract = %contract.name,
                    path = %primary,
                    size = bytes.len(),
                    "raw bytecode"
                );
                ExecutorOutcome {
                    raw: Ok(RawBuild {
                        path: primary,
                        bytes,
                    }),
                    invocations,
                }
            }
            Err(err) => {
                let message = if err.kind() == io::ErrorKind::NotFound {
                    format!("compiler succeeded but {primary} was not produced")
                } else {
                    format!("read {primary}: {err}")
                };
                warn!(contract = %contract.name, %message, "missing output artifact");
                ExecutorOutcome::failed(
                    invocation_failure(FailureKind::MissingOutputArtifact, message, &output),
                    invocations,
                )
            }
        }
    }
}

/// Variables pinned for every subprocess so locale and clock never leak into output.
pub(crate) fn reproducible_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string()),
        ("LANG".to_string(), "C".to_string()),
        ("LC_ALL".to_string(), "C".to_string()),
    ])
}

pub(crate) fn remove_stale(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

pub(crate) fn exit_message(tool: &str, output: &CommandOutput) -> String {
    match output.exit_code {
        Some(code) => format!("{tool} exited with status {code}"),
        None => format!("{tool} was terminated by a signal"),
    }
}

pub(crate) fn invocation_failure(
    kind: FailureKind,
    message: String,
    output: &CommandOutput,
) -> ContractFailure {
    ContractFailure {
        kind,
        message,
        exit_code: output.exit_code,
        timed_out: output.timed_out,
        output_tail: failure_tail(&output.stderr, &output.stdout, OUTPUT_TAIL_LIMIT),
    }
}
