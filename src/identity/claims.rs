//! Unverified identity-token claim decoding.
//!
//! Signature verification is the backend's job. The client only needs the
//! expiry time and the embedded user id for its expiry window and integrity
//! checks.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use super::error::IdentityError;
use super::types::unix_now_secs;

/// Claims read from an identity token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Expiration time (unix seconds).
    pub expires_at_unix: i64,
    pub issued_at_unix: Option<i64>,
    /// Principal id embedded in the token (`user_id`, falling back to `sub`).
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl TokenClaims {
    /// Decode the payload segment of a compact JWT.
    pub fn decode(token: &str) -> Result<Self, IdentityError> {
        let mut segments = token.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(IdentityError::Invalid(
                "identity token is not a three-segment JWT".to_string(),
            ));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|err| {
                IdentityError::Invalid(format!("failed to decode identity token payload: {err}"))
            })?;
        let raw: RawClaims = serde_json::from_slice(&bytes).map_err(|err| {
            IdentityError::Invalid(format!("failed to parse identity token claims: {err}"))
        })?;

        let user_id = raw
            .user_id
            .or(raw.sub)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                IdentityError::Invalid("identity token does not name a user".to_string())
            })?;

        Ok(Self {
            expires_at_unix: raw.exp,
            issued_at_unix: raw.iat,
            user_id,
            email: raw.email,
        })
    }

    /// True when the token expires within `window_secs` from now.
    pub fn expires_within(&self, window_secs: u64) -> bool {
        self.expires_within_at(window_secs, unix_now_secs())
    }

    pub(crate) fn expires_within_at(&self, window_secs: u64, now_unix: i64) -> bool {
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        now_unix.saturating_add(window) >= self.expires_at_unix
    }
}
