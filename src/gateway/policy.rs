//! Failure classification rules for backend responses.

use crate::error::GatewayError;

/// How the gateway reacts to a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 401 whose message carries the expiry keyword.
    Expired,
    /// 403 or 500: the session can no longer be trusted.
    SessionRevoked,
    /// Any other status: validation, not-found, conflict, plain 401, ...
    Application,
    /// No response received, or a non-status failure.
    Transport,
}

pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Classify a dispatch failure. `expiry_keyword` is matched case-insensitively.
pub fn classify(err: &GatewayError, expiry_keyword: &str) -> ErrorClass {
    let GatewayError::Status { code, message, body } = err else {
        return ErrorClass::Transport;
    };
    match *code {
        STATUS_UNAUTHORIZED if signals_expiry(message, body, expiry_keyword) => ErrorClass::Expired,
        STATUS_FORBIDDEN | STATUS_INTERNAL_ERROR => ErrorClass::SessionRevoked,
        _ => ErrorClass::Application,
    }
}

fn signals_expiry(message: &str, body: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_ascii_lowercase();
    if keyword.is_empty() {
        return false;
    }
    let message = message.to_ascii_lowercase();
    if message.contains(&keyword) {
        return true;
    }
    // Some error bodies carry the keyword outside `message` (e.g. `code`).
    message.is_empty() && body.to_ascii_lowercase().contains(&keyword)
}
