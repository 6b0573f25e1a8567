//! Property tests: materializing a package and re-packing the tree yields
//! the same files, byte for byte.

use camino::Utf8PathBuf;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use reprobuild_package::{Metadata, PackOptions, PackageFile, SourcePackage, decode, encode};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn arb_segment() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-z0-9_][a-z0-9_.-]{0,7}")
        .unwrap()
        .prop_filter("dot names", |s| !s.ends_with('.'))
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_segment(), 1..4).prop_map(|segments| segments.join("/"))
}

/// A file set where no path is a directory prefix of another.
fn arb_files() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(arb_path(), prop::collection::vec(any::<u8>(), 0..256), 0..12)
        .prop_map(|files| {
            let paths: Vec<String> = files.keys().cloned().collect();
            files
                .into_iter()
                .filter(|(path, _)| {
                    !paths
                        .iter()
                        .any(|other| other != path && other.starts_with(&format!("{path}/")))
                })
                .collect()
        })
}

fn package_from(files: &BTreeMap<String, Vec<u8>>, metadata: Metadata) -> SourcePackage {
    SourcePackage::new(
        files
            .iter()
            .map(|(path, content)| PackageFile {
                path: path.clone(),
                content: content.clone(),
            })
            .collect(),
        metadata,
    )
    .expect("valid package")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn materialize_then_repack_is_identity(files in arb_files()) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("unwrapped")).unwrap();

        let mut metadata = Metadata::default();
        metadata.insert("build_root_folder", "/tmp/sc-build");
        let original = package_from(&files, metadata.clone());

        original.materialize(&root).unwrap();
        let repacked =
            SourcePackage::from_directory(&root, &PackOptions::default(), metadata).unwrap();

        prop_assert_eq!(repacked.file_map(), original.file_map());
        prop_assert_eq!(encode(&repacked).unwrap(), encode(&original).unwrap());
    }

    #[test]
    fn decode_encode_is_identity(files in arb_files()) {
        let original = package_from(&files, Metadata::default());
        let bytes = encode(&original).unwrap();
        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(encode(&decoded).unwrap(), bytes);
    }
}

#[test]
fn module_dir_named_target_round_trips() {
    let temp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(temp.path().join("unwrapped")).expect("utf8");

    let mut files = BTreeMap::new();
    files.insert("Cargo.toml".to_string(), b"[package]\nname = \"adder\"\n".to_vec());
    files.insert("src/target/mod.rs".to_string(), b"pub fn id() {}\n".to_vec());
    let original = package_from(&files, Metadata::default());

    original.materialize(&root).expect("materialize");
    let repacked =
        SourcePackage::from_directory(&root, &PackOptions::default(), Metadata::default())
            .expect("repack");
    assert_eq!(repacked.file_map(), original.file_map());
}

#[test]
fn binary_content_survives_materialize() {
    let temp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).expect("utf8");

    let mut files = BTreeMap::new();
    files.insert("Cargo.lock".to_string(), b"# lock\r\nversion = 4\n".to_vec());
    files.insert("assets/blob.bin".to_string(), (0u8..=255).collect::<Vec<_>>());
    let package = package_from(&files, Metadata::default());

    package.materialize(&root).expect("materialize");

    assert_eq!(
        std::fs::read(root.join("Cargo.lock")).expect("read lock"),
        b"# lock\r\nversion = 4\n".to_vec()
    );
    assert_eq!(
        std::fs::read(root.join("assets/blob.bin")).expect("read blob"),
        (0u8..=255).collect::<Vec<_>>()
    );
}
