//! Top-level config loading pipeline.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;

use super::env::{apply_runtime_env_overrides, resolve_key_envs};
use super::init::config_root_dir;
use super::sources::read_config_text_with_sources;
use super::Config;

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

pub(super) fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<Config, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (config_text, source) =
        read_config_text_with_sources(path_override, &read_file, &config_root)?;
    debug!(?source, "loading configuration");

    let mut config: Config = toml::from_str(&config_text)?;
    apply_runtime_env_overrides(&mut config, &env_lookup)?;
    resolve_key_envs(&mut config, &env_lookup)?;
    normalize(&mut config)?;
    Ok(config)
}

fn normalize(config: &mut Config) -> Result<(), ConfigError> {
    config.backend.timeout_secs = config.backend.timeout_secs.max(1);
    config.session.refresh_timeout_secs = config.session.refresh_timeout_secs.max(1);

    let base_url = config.backend.base_url.trim().trim_end_matches('/');
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "backend.base_url `{}` must start with http:// or https://",
            config.backend.base_url
        )));
    }
    config.backend.base_url = base_url.to_string();

    let login_path = config.backend.login_path.trim();
    if login_path.is_empty() {
        return Err(ConfigError::Invalid(
            "backend.login_path must not be empty".to_string(),
        ));
    }
    config.backend.login_path = login_path.to_string();

    if config.session.expiry_keyword.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "session.expiry_keyword must not be empty".to_string(),
        ));
    }
    Ok(())
}
