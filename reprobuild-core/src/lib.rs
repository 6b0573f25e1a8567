//! Embeddable core library for reprobuild.
//!
//! Provides a clap-free, I/O-abstracted entry point for building every
//! contract of a workspace reproducibly and recording what was produced.
//!
//! # Port traits
//!
//! All side effects the pipeline does not own go through [`ports`]:
//! - [`CommandRunner`](ports::CommandRunner) runs the compiler and optimizer
//! - [`EnvSource`](ports::EnvSource) supplies the build-environment snapshot
//! - [`WritePort`](ports::WritePort) writes into the output directory
//!
//! The [`adapters`] module provides the default process/filesystem-backed
//! implementations plus in-memory doubles.
//!
//! # Entry point
//!
//! - [`run_build`](pipeline::run_build) discovers, builds, post-processes
//!   and persists `artifacts.json`.

pub mod adapters;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod executor;
pub mod lock;
pub mod outcome;
pub mod output;
pub mod pipeline;
pub mod ports;
pub mod postprocess;
pub mod settings;
pub mod sources;

pub use error::PipelineError;
pub use outcome::ArtifactsOutcome;
pub use pipeline::{BuildRun, run_build};

// Re-export the schema types embedders need so they don't depend on reprobuild-types directly.
pub use reprobuild_types::artifacts::{ArtifactsManifest, ToolInfo};
pub use reprobuild_types::contract::Contract;
pub use reprobuild_types::environment::BuildEnvironmentInfo;
pub use reprobuild_types::result::{BuildResult, ContractStatus};
