//! Unified error types for the gateway.

use std::fmt;
use std::sync::Arc;

use crate::identity::IdentityError;
use crate::session::StorageError;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Errors surfaced by [`crate::gateway::Gateway`].
#[derive(Debug)]
pub enum GatewayError {
    /// Network / reqwest-level error (no response was received).
    Http(reqwest::Error),
    /// Non-2xx status from the backend.
    Status {
        code: u16,
        /// Human-readable message extracted from the `{ "message": ... }` body.
        message: String,
        /// Raw response body.
        body: String,
    },
    /// Identity provider failure (sign-in, token fetch, sign-out).
    Identity(IdentityError),
    /// Shared outcome of a coalesced refresh that failed.
    RefreshFailed(Arc<GatewayError>),
    /// Local credentials are inconsistent with the live principal.
    Integrity(String),
    /// An operation needed a session and none is present.
    NotAuthenticated,
    Storage(StorageError),
    InvalidResponse(String),
}

impl GatewayError {
    /// Build a status error, extracting the message from a JSON body when present.
    pub fn status(code: u16, body: String) -> Self {
        let message = extract_message(&body);
        Self::Status {
            code,
            message,
            body,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::RefreshFailed(inner) => inner.status_code(),
            _ => None,
        }
    }

    /// Message payload of a status error.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }

    /// True when no HTTP response was received at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "http: {e}"),
            Self::Status { code, message, .. } => write!(f, "status {code}: {message}"),
            Self::Identity(e) => write!(f, "identity provider: {e}"),
            Self::RefreshFailed(e) => write!(f, "session refresh failed: {e}"),
            Self::Integrity(msg) => write!(f, "session integrity: {msg}"),
            Self::NotAuthenticated => write!(f, "not signed in"),
            Self::Storage(e) => write!(f, "session storage: {e}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<IdentityError> for GatewayError {
    fn from(e: IdentityError) -> Self {
        Self::Identity(e)
    }
}

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Pull `message` (or `error.message` / `error`) out of a structured error body.
fn extract_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let candidate = value
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| {
                value
                    .get("error")
                    .and_then(|e| e.get("message").and_then(|m| m.as_str()).or(e.as_str()))
            });
        if let Some(message) = candidate {
            return message.to_string();
        }
    }
    trimmed.to_string()
}
