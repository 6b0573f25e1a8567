//! Portable source packages.
//!
//! A package is one JSON document holding a relative-path file list and a
//! free-form metadata map. It lets a build be shipped to another machine and
//! re-run without depending on the producer's working directory.
//!
//! - [`decode`] / [`encode`] convert between bytes and [`SourcePackage`].
//! - [`SourcePackage::from_directory`] packs a tree.
//! - [`SourcePackage::materialize`] unpacks into a dedicated scratch directory.
//!   It deletes whatever was there first.

mod codec;
mod error;
mod package;
mod tree;

pub use codec::{decode, encode, validate_relative_path};
pub use error::PackageError;
pub use package::{Metadata, PackageFile, SourcePackage};
pub use tree::{PackOptions, is_cargo_output_dir};
