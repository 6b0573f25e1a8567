use crate::error::PackageError;
use crate::package::{Metadata, PackageFile, SourcePackage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reprobuild_types::package::{PackageEntryDocument, SourcePackageDocument};
use reprobuild_types::schema::REPROBUILD_SOURCE_V1;
use tracing::debug;

/// Parse a package document.
///
/// Fails with [`PackageError::Malformed`] on unparsable JSON, missing
/// `entries`, an unknown schema, bad base64, unsafe paths or duplicates.
/// Entry order is preserved.
pub fn decode(bytes: &[u8]) -> Result<SourcePackage, PackageError> {
    let doc: SourcePackageDocument = serde_json::from_slice(bytes)
        .map_err(|e| PackageError::malformed(format!("invalid document: {e}")))?;

    if let Some(schema) = doc.schema.as_deref()
        && schema != REPROBUILD_SOURCE_V1
    {
        return Err(PackageError::malformed(format!(
            "unsupported schema {schema:?}, expected {REPROBUILD_SOURCE_V1:?}"
        )));
    }

    let mut files = Vec::with_capacity(doc.entries.len());
    for entry in doc.entries {
        let content = STANDARD.decode(entry.content.as_bytes()).map_err(|e| {
            PackageError::malformed(format!("{}: invalid base64 content: {e}", entry.path))
        })?;
        files.push(PackageFile {
            path: entry.path,
            content,
        });
    }

    let package = SourcePackage::new(files, Metadata::new(doc.metadata))?;
    debug!(
        files = package.files().len(),
        bytes = package.total_bytes(),
        "decoded source package"
    );
    Ok(package)
}

/// Serialize a package, entries in stored order.
pub fn encode(package: &SourcePackage) -> Result<Vec<u8>, PackageError> {
    let doc = SourcePackageDocument {
        schema: Some(REPROBUILD_SOURCE_V1.to_string()),
        metadata: package.metadata().as_map().clone(),
        entries: package
            .files()
            .iter()
            .map(|f| PackageEntryDocument {
                path: f.path.clone(),
                content: STANDARD.encode(&f.content),
            })
            .collect(),
    };
    let mut out = serde_json::to_vec_pretty(&doc)?;
    out.push(b'\n');
    Ok(out)
}

/// Check that `path` is relative, uses `/` separators and cannot escape
/// the package root.
pub fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    if path.starts_with('/') {
        return Err("absolute path".to_string());
    }
    if path.contains('\\') {
        return Err("backslash separator".to_string());
    }
    if path.contains(':') {
        return Err("drive or stream prefix".to_string());
    }
    if path.contains('\0') {
        return Err("NUL byte".to_string());
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err("empty segment".to_string()),
            "." => return Err("'.' segment".to_string()),
            ".." => return Err("'..' segment escapes the package root".to_string()),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(entries: &str) -> String {
        format!(r#"{{"schema": "reprobuild.source.v1", "metadata": {{}}, "entries": {entries}}}"#)
    }

    #[test]
    fn decodes_entries_in_order() {
        let json = doc(
            r#"[{"path": "Cargo.toml", "content": "W3dvcmtzcGFjZV0K"},
                {"path": "a/src/lib.rs", "content": ""}]"#,
        );
        let package = decode(json.as_bytes()).expect("decode");
        let paths: Vec<&str> = package.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Cargo.toml", "a/src/lib.rs"]);
        assert_eq!(package.files()[0].content, b"[workspace]\n");
        assert!(package.files()[1].content.is_empty());
    }

    #[test]
    fn rejects_non_json() {
        let err = decode(b"not json").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn accepts_nested_metadata() {
        let package = decode(
            br#"{"metadata": {"buildOptions": {"buildRootFolder": "/tmp/x"}}, "entries": []}"#,
        )
        .expect("nested metadata is opaque to the codec");
        assert_eq!(package.metadata().build_root_folder(), Some("/tmp/x"));
        assert_eq!(package.metadata().get("buildOptions", "flat only"), "flat only");

        let reencoded = decode(&encode(&package).expect("encode")).expect("decode again");
        assert_eq!(reencoded.metadata(), package.metadata());
    }

    #[test]
    fn rejects_missing_entries() {
        let err = decode(br#"{"metadata": {"a": "b"}}"#).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("entries"));
    }

    #[test]
    fn rejects_unknown_schema() {
        let err = decode(br#"{"schema": "other.v9", "entries": []}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported schema"));
    }

    #[test]
    fn rejects_bad_base64() {
        let err = decode(doc(r#"[{"path": "a", "content": "%%%"}]"#).as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid base64"));
    }

    #[test]
    fn rejects_path_traversal() {
        let err = decode(doc(r#"[{"path": "src/../../etc/passwd", "content": ""}]"#).as_bytes())
            .unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn rejects_duplicate_paths() {
        let err = decode(
            doc(r#"[{"path": "a", "content": ""}, {"path": "a", "content": "YQ=="}]"#).as_bytes(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn schema_is_optional() {
        let package = decode(br#"{"entries": [{"path": "x", "content": "eA=="}]}"#)
            .expect("decode without schema");
        assert_eq!(package.files()[0].content, b"x");
    }

    #[test]
    fn validate_relative_path_cases() {
        assert!(validate_relative_path("src/lib.rs").is_ok());
        assert!(validate_relative_path(".cargo/config.toml").is_ok());
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("a\\b").is_err());
        assert!(validate_relative_path("C:/x").is_err());
        assert!(validate_relative_path("a//b").is_err());
        assert!(validate_relative_path("./a").is_err());
        assert!(validate_relative_path("a/..").is_err());
    }

    #[test]
    fn encode_then_decode_preserves_bytes_and_metadata() {
        let mut metadata = Metadata::default();
        metadata.insert("contract_name", "adder");
        let package = SourcePackage::new(
            vec![PackageFile {
                path: "bin/blob".to_string(),
                content: vec![0, 159, 146, 150, b'\r', b'\n'],
            }],
            metadata,
        )
        .expect("package");

        let bytes = encode(&package).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, package);
    }
}
