//! Sign-in navigation hook invoked at the end of every logout.

use std::fmt;
use tracing::info;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user asked to sign out.
    Requested,
    /// Expired token and no remember preference.
    ExpiredWithoutRemember,
    /// The coalesced refresh failed.
    RefreshFailed,
    /// The backend still rejected the request after a successful refresh.
    RejectedAfterRefresh,
    /// 403 / 500 from the backend.
    Revoked { status: u16 },
    /// Local credentials did not match the live principal.
    Integrity,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "signed out"),
            Self::ExpiredWithoutRemember => write!(f, "session expired"),
            Self::RefreshFailed => write!(f, "session could not be renewed"),
            Self::RejectedAfterRefresh => write!(f, "renewed session was rejected"),
            Self::Revoked { status } => write!(f, "backend ended the session (status {status})"),
            Self::Integrity => write!(f, "stored credentials failed an integrity check"),
        }
    }
}

/// Callable "go to sign-in" capability.
pub trait Navigator: Send + Sync {
    fn to_sign_in(&self, reason: &LogoutReason);
}

/// Navigator that only records the redirect in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn to_sign_in(&self, reason: &LogoutReason) {
        info!(%reason, "redirecting to sign-in");
    }
}
