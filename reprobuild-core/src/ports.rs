//! Port traits abstracting all I/O the pipeline does not own.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::time::Duration;

/// One subprocess invocation. The child sees only the inherited process
/// environment plus `env`; `env` wins on conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Utf8PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl Invocation {
    /// Space-joined command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished (or killed) subprocess left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Last bytes of stdout, lossily decoded.
    pub stdout: String,
    /// Last bytes of stderr, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs compiler and optimizer subprocesses.
///
/// `Err` means the process could not be started at all; a process that
/// ran and failed is an `Ok` with a non-zero exit.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> anyhow::Result<CommandOutput>;
}

/// Read access to the ambient environment.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;

    /// All variables, sorted by name.
    fn vars(&self) -> Vec<(String, String)>;
}

/// File-system write operations into the output directory.
pub trait WritePort: Send + Sync {
    /// Replace `path` atomically: readers see the old contents or the new
    /// ones, never a partial file.
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()>;
    fn create_dir_all(&self, path: &Utf8Path) -> anyhow::Result<()>;
    /// Remove a file; a missing file is not an error.
    fn remove_file(&self, path: &Utf8Path) -> anyhow::Result<()>;
}
