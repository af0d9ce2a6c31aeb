//! Public identity model types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The identity provider's view of the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Long-lived provider credential used to mint new identity tokens.
    pub refresh_token: String,
}

/// Email/password sign-in credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Result of a successful provider authentication.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub principal: Principal,
    pub identity_token: String,
}

pub(crate) fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
