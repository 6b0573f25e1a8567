use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Outcome class of one contract's build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    /// Raw bytecode produced, and optimized bytecode unless optimization was disabled.
    Succeeded,
    /// Raw bytecode is valid but a post-processing step failed.
    Degraded,
    /// No usable bytecode.
    Failed,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Succeeded => "succeeded",
            ContractStatus::Degraded => "degraded",
            ContractStatus::Failed => "failed",
        }
    }
}

/// Why a contract did not fully succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BuildFailed,
    MissingOutputArtifact,
    OptimizationFailed,
    PackagingFailed,
}

impl FailureKind {
    /// Whether the failure leaves the contract without raw bytecode.
    pub fn is_fatal_for_contract(self) -> bool {
        matches!(
            self,
            FailureKind::BuildFailed | FailureKind::MissingOutputArtifact
        )
    }
}

/// A recorded per-contract failure with its diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractFailure {
    pub kind: FailureKind,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,

    /// Bounded tail of the subprocess output (stderr, then stdout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

impl ContractFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            timed_out: false,
            output_tail: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationTool {
    Compiler,
    Optimizer,
}

/// Exit status of one subprocess invoked for a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub tool: InvocationTool,

    /// `None` when the process was killed by a signal or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

/// A file written to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Relative to the output directory, forward slashes.
    pub path: Utf8PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Everything recorded about one contract's build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: ContractStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<ArtifactRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized: Option<ArtifactRef>,

    /// Hash of the deployable bytecode: optimized when present, raw otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codehash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_package: Option<ArtifactRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<InvocationRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ContractFailure>,
}

impl BuildResult {
    /// A result with no bytecode and a single failure.
    pub fn failed(failure: ContractFailure, invocations: Vec<InvocationRecord>) -> Self {
        let mut result = Self {
            status: ContractStatus::Failed,
            raw: None,
            optimized: None,
            codehash: None,
            source_package: None,
            invocations,
            failures: vec![failure],
        };
        result.refresh_status();
        result
    }

    /// Recompute `status` and `codehash` from the recorded fields.
    pub fn refresh_status(&mut self) {
        self.status = if self.raw.is_none()
            || self.failures.iter().any(|f| f.kind.is_fatal_for_contract())
        {
            ContractStatus::Failed
        } else if self.failures.is_empty() {
            ContractStatus::Succeeded
        } else {
            ContractStatus::Degraded
        };

        self.codehash = self
            .optimized
            .as_ref()
            .or(self.raw.as_ref())
            .map(|a| a.sha256.clone());
    }
}
