//! Environment-variable overrides and secret resolution.

use crate::error::ConfigError;

use super::Config;

pub(super) const ENV_BASE_URL: &str = "ADMIN_GATEWAY_BASE_URL";
pub(super) const ENV_API_KEY: &str = "ADMIN_GATEWAY_API_KEY";
pub(super) const ENV_IDENTITY_KEY: &str = "ADMIN_GATEWAY_IDENTITY_KEY";
pub(super) const ENV_TIMEOUT_SECS: &str = "ADMIN_GATEWAY_TIMEOUT_SECS";

/// Apply `ADMIN_GATEWAY_*` overrides on top of file values.
pub(super) fn apply_runtime_env_overrides<FEnv>(
    config: &mut Config,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty_env(env_lookup, ENV_BASE_URL) {
        config.backend.base_url = url;
    }
    if let Some(key) = non_empty_env(env_lookup, ENV_API_KEY) {
        config.backend.api_key = key;
    }
    if let Some(key) = non_empty_env(env_lookup, ENV_IDENTITY_KEY) {
        config.identity.api_key = key;
    }
    if let Some(timeout) = non_empty_env(env_lookup, ENV_TIMEOUT_SECS) {
        let parsed = timeout.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid {ENV_TIMEOUT_SECS} value `{timeout}`: expected positive integer seconds"
            ))
        })?;
        config.backend.timeout_secs = parsed;
    }
    Ok(())
}

/// Fill empty keys from their `api_key_env` variables. A named but unset
/// variable is an error.
pub(super) fn resolve_key_envs<FEnv>(config: &mut Config, env_lookup: &FEnv) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    resolve_key(
        &mut config.backend.api_key,
        config.backend.api_key_env.as_deref(),
        "backend",
        env_lookup,
    )?;
    resolve_key(
        &mut config.identity.api_key,
        config.identity.api_key_env.as_deref(),
        "identity",
        env_lookup,
    )
}

fn resolve_key<FEnv>(
    key: &mut String,
    env_name: Option<&str>,
    section: &str,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if !key.trim().is_empty() {
        return Ok(());
    }
    let Some(name) = env_name.map(str::trim).filter(|name| !name.is_empty()) else {
        return Ok(());
    };
    match non_empty_env(env_lookup, name) {
        Some(value) => {
            *key = value;
            Ok(())
        }
        None => Err(ConfigError::Invalid(format!(
            "{section}.api_key_env names `{name}` but it is not set"
        ))),
    }
}

fn non_empty_env<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
