//! Compile-time build metadata exposed to CLI surfaces.

/// Semver package version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VCS commit hash captured at build time.
pub const GIT_COMMIT: &str = env!("ADMIN_GATEWAY_BUILD_GIT_HASH");

/// Build timestamp captured at compile time.
pub const BUILD_TIMESTAMP: &str = env!("ADMIN_GATEWAY_BUILD_TIMESTAMP");

/// Help trailer block that surfaces build metadata in `admin-gateway --help`.
pub const HELP_BUILD_METADATA: &str = concat!(
    "Build metadata:\n  commit: ",
    env!("ADMIN_GATEWAY_BUILD_GIT_HASH"),
    "\n  built: ",
    env!("ADMIN_GATEWAY_BUILD_TIMESTAMP")
);

/// One-line banner shown when the interactive shell starts.
pub fn startup_metadata_line() -> String {
    format!("admin-gateway v{VERSION} ({GIT_COMMIT}, built {BUILD_TIMESTAMP})")
}
