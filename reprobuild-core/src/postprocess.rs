//! Hashing and optional optimization of raw bytecode.

use crate::executor::{RawBuild, exit_message, invocation_failure, remove_stale, reproducible_env};
use crate::ports::{CommandRunner, Invocation, WritePort};
use crate::settings::{BuildOptions, ToolchainSettings};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use reprobuild_hash::sha256_hex;
use reprobuild_types::contract::Contract;
use reprobuild_types::result::{
    ArtifactRef, ContractFailure, FailureKind, InvocationRecord, InvocationTool,
};
use tracing::{debug, warn};

/// Post-processing result for one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBytecode {
    pub raw: ArtifactRef,
    pub optimized: Option<ArtifactRef>,
    pub invocations: Vec<InvocationRecord>,
    pub failures: Vec<ContractFailure>,
}

impl ProcessedBytecode {
    /// Hash of the deployable bytecode.
    pub fn codehash(&self) -> &str {
        self.optimized
            .as_ref()
            .map_or(&self.raw.sha256, |opt| &opt.sha256)
    }
}

/// Writes processed bytecode under `<output>/<name>/`.
pub struct WasmPostProcessor<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a ToolchainSettings,
    writer: &'a dyn WritePort,
    output_dir: &'a Utf8Path,
}

impl<'a> WasmPostProcessor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        toolchain: &'a ToolchainSettings,
        writer: &'a dyn WritePort,
        output_dir: &'a Utf8Path,
    ) -> Self {
        Self {
            runner,
            toolchain,
            writer,
            output_dir,
        }
    }

    /// Remove bytecode and codehash files left by an earlier run, so the
    /// contract's output folder only holds what this run records.
    pub fn clear_previous(&self, contract: &Contract) -> anyhow::Result<()> {
        let name = &contract.name;
        for relative in [
            format!("{name}/{name}.wasm"),
            format!("{name}/{name}.opt.wasm"),
            format!("{name}/{name}.codehash.txt"),
        ] {
            self.writer
                .remove_file(&self.output_dir.join(&relative))
                .with_context(|| format!("remove previous {relative}"))?;
        }
        Ok(())
    }

    /// Hash and store the raw bytecode, then optimize it unless disabled.
    ///
    /// An optimizer failure is recorded and the raw result kept. `Err` is
    /// reserved for failures to write into the output directory.
    pub fn process(
        &self,
        contract: &Contract,
        raw: &RawBuild,
        options: &BuildOptions,
    ) -> anyhow::Result<ProcessedBytecode> {
        let name = &contract.name;
        let raw_ref = self.store(&format!("{name}/{name}.wasm"), &raw.bytes)?;
        debug!(contract = %name, sha256 = %raw_ref.sha256, "raw bytecode stored");

        let mut processed = ProcessedBytecode {
            raw: raw_ref,
            optimized: None,
            invocations: Vec::new(),
            failures: Vec::new(),
        };

        if !options.no_wasm_opt {
            match self.optimize(contract, raw, options, &mut processed.invocations) {
                Ok(bytes) => {
                    processed.optimized =
                        Some(self.store(&format!("{name}/{name}.opt.wasm"), &bytes)?);
                }
                Err(failure) => {
                    warn!(contract = %name, message = %failure.message, "optimization failed");
                    processed.failures.push(failure);
                }
            }
        }

        let codehash_path = format!("{name}/{name}.codehash.txt");
        self.writer
            .write_file(
                &self.output_dir.join(&codehash_path),
                processed.codehash().as_bytes(),
            )
            .with_context(|| format!("write {codehash_path}"))?;

        Ok(processed)
    }

    fn optimize(
        &self,
        contract: &Contract,
        raw: &RawBuild,
        options: &BuildOptions,
        invocations: &mut Vec<InvocationRecord>,
    ) -> Result<Vec<u8>, ContractFailure> {
        let output_path = contract
            .target_dir
            .join(format!("{}.opt.wasm", contract.artifact_stem()));
        remove_stale(&output_path).map_err(|err| {
            ContractFailure::new(
                FailureKind::OptimizationFailed,
                format!("remove stale optimizer output: {err}"),
            )
        })?;

        let invocation = self.invocation(&raw.path, &output_path, &contract.target_dir, options);
        let output = self.runner.run(&invocation).map_err(|err| {
            ContractFailure::new(
                FailureKind::OptimizationFailed,
                format!("failed to start optimizer: {err:#}"),
            )
        })?;
        invocations.push(InvocationRecord {
            tool: InvocationTool::Optimizer,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
        });

        if output.timed_out {
            return Err(invocation_failure(
                FailureKind::OptimizationFailed,
                format!("optimizer timed out after {}s", options.timeout.as_secs()),
                &output,
            ));
        }
        if !output.success() {
            return Err(invocation_failure(
                FailureKind::OptimizationFailed,
                exit_message("optimizer", &output),
                &output,
            ));
        }
        fs::read(&output_path).map_err(|err| {
            invocation_failure(
                FailureKind::OptimizationFailed,
                format!("optimizer produced no output at {output_path}: {err}"),
                &output,
            )
        })
    }

    fn invocation(
        &self,
        input: &Utf8Path,
        output: &Utf8Path,
        working_dir: &Utf8Path,
        options: &BuildOptions,
    ) -> Invocation {
        let mut args = self.toolchain.optimizer_args.clone();
        args.extend([input.to_string(), "-o".to_string(), output.to_string()]);
        Invocation {
            program: self.toolchain.optimizer.clone(),
            args,
            working_dir: working_dir.to_path_buf(),
            env: reproducible_env(),
            timeout: options.timeout,
        }
    }

    fn store(&self, relative: &str, bytes: &[u8]) -> anyhow::Result<ArtifactRef> {
        let path = self.output_dir.join(relative);
        self.writer
            .write_file(&path, bytes)
            .with_context(|| format!("write {relative}"))?;
        Ok(ArtifactRef {
            path: Utf8PathBuf::from(relative),
            sha256: sha256_hex(bytes),
            size: bytes.len() as u64,
        })
    }
}
