//! Configuration data model.
//!
//! Struct definitions plus default values. Source discovery, env overrides
//! and secret resolution live in the sibling modules.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::{
    DEFAULT_BACKEND_BASE_URL, DEFAULT_EXPIRY_KEYWORD, DEFAULT_EXPIRY_WINDOW_SECS,
    DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_TIMEOUT_SECS, DEFAULT_REFRESH_URL, DEFAULT_SIGN_IN_URL,
    DEFAULT_TIMEOUT_SECS,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub identity: IdentityConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Path of the encrypted durable session store.
    pub fn session_store_path(&self) -> PathBuf {
        self.session
            .store_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .or_else(super::default_session_store_path)
            .unwrap_or_else(|| PathBuf::from(super::defaults::SESSION_STORE_FILE_NAME))
    }
}

/// `[backend]`: the admin API behind the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Static API key. Resolved from `api_key_env` when empty.
    pub api_key: String,
    /// Environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub login_path: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_BASE_URL.to_string(),
            api_key: String::new(),
            api_key_env: None,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// `[identity]`: the external identity provider.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub sign_in_url: String,
    pub refresh_url: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_key_env: None,
            sign_in_url: DEFAULT_SIGN_IN_URL.to_string(),
            refresh_url: DEFAULT_REFRESH_URL.to_string(),
        }
    }
}

/// `[session]`: expiry detection and local persistence.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub expiry_window_secs: u64,
    pub expiry_keyword: String,
    pub refresh_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_window_secs: DEFAULT_EXPIRY_WINDOW_SECS,
            expiry_keyword: DEFAULT_EXPIRY_KEYWORD.to_string(),
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            store_path: None,
        }
    }
}

/// Result of `admin-gateway init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigInitResult {
    Created { path: PathBuf },
    AlreadyInitialized { path: PathBuf },
    Overwritten { path: PathBuf, backup_path: PathBuf },
}
