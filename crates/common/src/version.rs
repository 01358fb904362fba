use std::fmt;

use serde::Serialize;

/// Build information stamped into a binary by its `build.rs`
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
    pub build_target: &'static str,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, features: {}) built {} for {} with {}",
            self.version,
            self.build_profile,
            self.build_features,
            self.build_timestamp,
            self.build_target,
            self.rust_version
        )
    }
}

/// Collect [`BuildInfo`] from the calling crate's build environment
///
/// Expands at the call site, so it reads the variables set by that crate's
/// build script. Missing variables read as `"unknown"`.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo {
            version: option_env!("REPO_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
            build_profile: option_env!("BUILD_PROFILE").unwrap_or("unknown"),
            build_features: option_env!("BUILD_FEATURES").unwrap_or("unknown"),
            build_timestamp: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            rust_version: option_env!("RUST_VERSION").unwrap_or("unknown"),
            build_target: option_env!("BUILD_TARGET").unwrap_or("unknown"),
        }
    };
}

#[cfg(test)]
mod test {
    #[test]
    fn test_build_info_falls_back() {
        let info = build_info!();
        assert!(!info.version.is_empty());
        assert!(info.to_string().contains(info.build_profile));
    }
}
