//! Default configuration constants.
//!
//! Keeping defaults in one module lets the types, the loader and the
//! embedded template share the same literals.

/// Embedded default `admin-gateway.toml` template written by `admin-gateway init`.
pub(super) const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/admin-gateway.toml");
/// File name used for local and global config files.
pub(super) const CONFIG_FILE_NAME: &str = "admin-gateway.toml";
/// Directory under the config root holding global config and session state.
pub(super) const CONFIG_DIR_NAME: &str = "admin-gateway";
/// File name of the encrypted durable session store.
pub(super) const SESSION_STORE_FILE_NAME: &str = "session.json";

pub(super) const DEFAULT_BACKEND_BASE_URL: &str = "http://localhost:8080";
pub(super) const DEFAULT_LOGIN_PATH: &str = "/api/admin/auth/login";
pub(super) const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub(super) const DEFAULT_SIGN_IN_URL: &str =
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword";
pub(super) const DEFAULT_REFRESH_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Remembered tokens expiring within this window are refreshed before dispatch.
pub(super) const DEFAULT_EXPIRY_WINDOW_SECS: u64 = 300;
pub(super) const DEFAULT_EXPIRY_KEYWORD: &str = "expired";
pub(super) const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;
