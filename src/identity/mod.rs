//! Identity provider capability and its HTTP implementation.
//!
//! The gateway treats the provider as opaque: it authenticates credentials,
//! mints (and force-refreshes) identity tokens for a principal, exposes the
//! token claims, and signs the principal out.

mod claims;
mod error;
mod http;
mod types;

pub use claims::TokenClaims;
pub use error::IdentityError;
pub use http::{HttpIdentityProvider, IdentityEndpoints};
pub use types::{Credentials, Principal, SignedIn};
#[cfg(test)]
pub(crate) use types::unix_now_secs;

use async_trait::async_trait;

use crate::session::Persistence;

/// External identity provider consumed by the gateway.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authenticate credentials and attach the resulting principal.
    async fn authenticate(
        &self,
        credentials: &Credentials,
        persistence: Persistence,
    ) -> Result<SignedIn, IdentityError>;

    /// Return an identity token for `principal`, minting a new one when
    /// `force_refresh` is set or the cached one is stale.
    async fn get_token(
        &self,
        principal: &Principal,
        force_refresh: bool,
    ) -> Result<String, IdentityError>;

    /// Claims of the principal's current identity token.
    async fn token_claims(&self, principal: &Principal) -> Result<TokenClaims, IdentityError>;

    async fn sign_out(&self, principal: &Principal) -> Result<(), IdentityError>;

    /// The principal the provider currently recognizes, if any.
    fn current_principal(&self) -> Option<Principal>;
}
