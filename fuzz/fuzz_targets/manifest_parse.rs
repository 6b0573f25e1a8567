#![no_main]

use libfuzzer_sys::fuzz_target;
use reprobuild_types::artifacts::ArtifactsManifest;

fuzz_target!(|data: &[u8]| {
    if let Ok(manifest) = serde_json::from_slice::<ArtifactsManifest>(data) {
        let json = serde_json::to_vec(&manifest).expect("serialize manifest");
        let reparsed: ArtifactsManifest =
            serde_json::from_slice(&json).expect("reparse serialized manifest");
        assert_eq!(manifest, reparsed);
    }
});
