//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`ADMIN_GATEWAY_BASE_URL`, `ADMIN_GATEWAY_API_KEY`,
//!    `ADMIN_GATEWAY_IDENTITY_KEY`, `ADMIN_GATEWAY_TIMEOUT_SECS`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./admin-gateway.toml in the current directory
//! 4. $XDG_CONFIG_HOME/admin-gateway/admin-gateway.toml
//!    (or ~/.config/admin-gateway/admin-gateway.toml)
//! 5. Built-in defaults

mod defaults;
mod env;
mod init;
mod loader;
mod sources;
mod types;

pub use init::{
    config_root_dir, default_config_path, default_session_store_path, initialize_default_config,
};
pub use loader::load_config;
pub use types::{BackendConfig, Config, ConfigInitResult, IdentityConfig, SessionConfig};
