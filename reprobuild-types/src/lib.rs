//! Shared DTOs (schemas-as-code) for the reprobuild workspace.
//!
//! # Design constraints
//! - The artifacts manifest and the source package document are read by
//!   third-party verifiers. Treat their shape as a compatibility contract.
//! - Prefer adding optional fields over changing semantics.
//! - No timestamps or host-specific values in anything that gets hashed or
//!   compared across machines.

pub mod artifacts;
pub mod contract;
pub mod environment;
pub mod package;
pub mod result;

/// Schema identifiers.
pub mod schema {
    pub const REPROBUILD_ARTIFACTS_V1: &str = "reprobuild.artifacts.v1";
    pub const REPROBUILD_SOURCE_V1: &str = "reprobuild.source.v1";
    pub const REPROBUILD_LOCK_V1: &str = "reprobuild.lock.v1";
}
