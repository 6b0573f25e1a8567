//! Build-environment snapshot taken from `BUILD_METADATA_*` variables.

use crate::ports::EnvSource;
use reprobuild_types::environment::BuildEnvironmentInfo;

pub const ENV_PREFIX: &str = "BUILD_METADATA_";
pub const ENV_TOOLCHAIN: &str = "BUILD_METADATA_VERSION_RUST";
pub const ENV_OPTIMIZER: &str = "BUILD_METADATA_VERSION_WASM_OPT";
pub const ENV_IMAGE: &str = "BUILD_METADATA_IMAGE";

/// Read the build-environment facts through `env`.
///
/// Missing or blank variables become omitted fields. Any other
/// `BUILD_METADATA_<SUFFIX>` variable lands in `extra` under the lowercase
/// suffix.
pub fn capture_from_environment(env: &dyn EnvSource) -> BuildEnvironmentInfo {
    let read = |name: &str| {
        env.var(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut info = BuildEnvironmentInfo {
        toolchain: read(ENV_TOOLCHAIN),
        optimizer: read(ENV_OPTIMIZER),
        image: read(ENV_IMAGE),
        ..BuildEnvironmentInfo::default()
    };

    for (name, value) in env.vars() {
        if matches!(name.as_str(), ENV_TOOLCHAIN | ENV_OPTIMIZER | ENV_IMAGE) {
            continue;
        }
        let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let value = value.trim();
        if suffix.is_empty() || value.is_empty() {
            continue;
        }
        info.extra
            .insert(suffix.to_ascii_lowercase(), value.to_string());
    }

    info
}
