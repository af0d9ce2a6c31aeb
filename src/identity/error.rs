//! Identity provider error definitions.

use std::fmt;

use crate::session::StorageError;

/// Errors surfaced by an [`super::IdentityProvider`].
#[derive(Debug)]
pub enum IdentityError {
    Http(reqwest::Error),
    Status(u16, String),
    /// The provider refused the credential (bad password, revoked refresh token, disabled user).
    Rejected(String),
    /// No principal is attached to the provider.
    NoPrincipal,
    /// The provider did not answer within the refresh deadline.
    TimedOut,
    Storage(StorageError),
    Invalid(String),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "http: {err}"),
            Self::Status(code, body) => write!(f, "status {code}: {body}"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::NoPrincipal => write!(f, "no signed-in principal"),
            Self::TimedOut => write!(f, "identity provider timed out"),
            Self::Storage(err) => write!(f, "principal storage: {err}"),
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IdentityError {}

impl From<reqwest::Error> for IdentityError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<StorageError> for IdentityError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}
