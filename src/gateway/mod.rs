//! Authenticated request gateway.
//!
//! Every backend call goes through [`Gateway::send`], which:
//! - attaches the API key, bearer token and principal header,
//! - refreshes an expired session once (coalesced across callers) and
//!   replays the request exactly once,
//! - tears the session down when it can no longer be trusted.
//!
//! Collaborators (transport, identity provider, navigator, session context)
//! are injected at construction.

mod navigator;
mod policy;
mod refresh;
mod request;
mod transport;

pub use navigator::{LogNavigator, LogoutReason, Navigator};
pub use policy::{classify, ErrorClass};
pub use request::{
    ApiRequest, Method, PreparedRequest, API_KEY_HEADER, AUTHORIZATION_HEADER, USER_ID_HEADER,
};
pub use transport::{build_http_client, HttpTransport, Transport};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::identity::{
    Credentials, HttpIdentityProvider, IdentityEndpoints, IdentityError, IdentityProvider,
    SignedIn, TokenClaims,
};
use crate::session::{
    FileStorage, MemoryStorage, Persistence, Role, Session, SessionContext, SessionState,
    SessionStore,
};
use refresh::RefreshCoordinator;

/// Tunables read from configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Static API key sent with every request.
    pub api_key: String,
    /// Backend sign-in endpoint called after provider authentication.
    pub login_path: String,
    /// Case-insensitive marker of an expired-token 401.
    pub expiry_keyword: String,
    /// Tokens expiring within this window are refreshed before dispatch.
    pub expiry_window: Duration,
    /// Upper bound on one identity-provider refresh.
    pub refresh_timeout: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.backend.api_key.clone(),
            login_path: config.backend.login_path.clone(),
            expiry_keyword: config.session.expiry_keyword.clone(),
            expiry_window: Duration::from_secs(config.session.expiry_window_secs),
            refresh_timeout: Duration::from_secs(config.session.refresh_timeout_secs.max(1)),
        }
    }
}

/// Outcome of the pre-dispatch credential check.
enum Integrity {
    Consistent(Option<TokenClaims>),
    /// Token disagrees with the session but the live principal matches it.
    Reconcilable(String),
    Broken(String),
}

/// Single choke point for authenticated backend calls.
pub struct Gateway {
    settings: GatewaySettings,
    transport: Arc<dyn Transport>,
    identity: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
    context: Arc<SessionContext>,
    refresh: RefreshCoordinator,
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn IdentityProvider>,
        navigator: Arc<dyn Navigator>,
        context: Arc<SessionContext>,
    ) -> Self {
        Self {
            settings,
            transport,
            identity,
            navigator,
            context,
            refresh: RefreshCoordinator::new(),
        }
    }

    /// Wire the production stack from configuration and restore any saved session.
    pub fn from_config(config: &Config, navigator: Arc<dyn Navigator>) -> Result<Self, GatewayError> {
        let http = build_http_client(Duration::from_secs(config.backend.timeout_secs));
        let durable = Arc::new(FileStorage::new(config.session_store_path()));
        let store = SessionStore::new(durable, Arc::new(MemoryStorage::new()));
        let identity = HttpIdentityProvider::new(
            http.clone(),
            IdentityEndpoints {
                sign_in_url: config.identity.sign_in_url.clone(),
                refresh_url: config.identity.refresh_url.clone(),
                api_key: config.identity.api_key.clone(),
            },
            store.clone(),
        )?;
        let context = Arc::new(SessionContext::new(store));
        context.init()?;
        Ok(Self::new(
            GatewaySettings::from_config(config),
            Arc::new(HttpTransport::new(http, &config.backend.base_url)),
            Arc::new(identity),
            navigator,
            context,
        ))
    }

    pub fn state(&self) -> SessionState {
        self.context.state()
    }

    pub fn session(&self) -> Option<Session> {
        self.context.snapshot()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Send one request with credentials attached.
    ///
    /// Returns the parsed response body. Errors are always propagated; a
    /// forced logout, when one happens, runs before the error is returned.
    pub async fn send(&self, request: &ApiRequest) -> Result<Value, GatewayError> {
        let session = self.prepare_session().await?;
        let prepared = request.prepare(&self.settings.api_key, session.as_ref());
        let err = match self.transport.dispatch(&prepared).await {
            Ok(body) => return Ok(body),
            Err(err) => err,
        };

        match classify(&err, &self.settings.expiry_keyword) {
            ErrorClass::Expired => self.recover_expired(request, session, err).await,
            ErrorClass::SessionRevoked => {
                let status = err.status_code().unwrap_or_default();
                warn!(status, path = %request.path, "backend rejected the session");
                self.force_logout(LogoutReason::Revoked { status }).await;
                Err(err)
            }
            ErrorClass::Application | ErrorClass::Transport => Err(err),
        }
    }

    /// Sign in with the identity provider, then the backend.
    ///
    /// Any previous session is torn down first. When backend authentication
    /// fails the provider principal is signed out again and the gateway stays
    /// unauthenticated.
    pub async fn sign_in(
        &self,
        credentials: &Credentials,
        remember: bool,
    ) -> Result<Session, GatewayError> {
        if self.context.teardown()?.is_some() {
            debug!("replacing existing session on sign-in");
        }
        let signed_in = self
            .identity
            .authenticate(credentials, Persistence::from_remember(remember))
            .await?;

        match self.complete_sign_in(&signed_in, remember).await {
            Ok(session) => Ok(session),
            Err(err) => {
                warn!(%err, uid = %signed_in.principal.uid, "backend sign-in failed; rolling back");
                if let Err(sign_out_err) = self.identity.sign_out(&signed_in.principal).await {
                    warn!(%sign_out_err, "failed to sign out provider principal during rollback");
                }
                if let Err(storage_err) = self.context.teardown() {
                    warn!(%storage_err, "failed to clear session storage during rollback");
                }
                Err(err)
            }
        }
    }

    /// User-initiated sign-out.
    pub async fn logout(&self) {
        info!("signing out");
        self.force_logout(LogoutReason::Requested).await;
    }

    async fn complete_sign_in(
        &self,
        signed_in: &SignedIn,
        remember: bool,
    ) -> Result<Session, GatewayError> {
        let mut session = Session {
            identity_token: signed_in.identity_token.clone(),
            user_id: signed_in.principal.uid.clone(),
            remember,
            role: Role::Admin,
        };
        let body = serde_json::json!({ "email": signed_in.principal.email });
        let prepared = ApiRequest::post(self.settings.login_path.clone(), body)
            .prepare(&self.settings.api_key, Some(&session));
        let response = self.transport.dispatch(&prepared).await?;
        session.role = role_from_login_response(&response)?;
        self.context.establish(session.clone())?;
        Ok(session)
    }

    /// Validate stored credentials and refresh them ahead of dispatch when needed.
    async fn prepare_session(&self) -> Result<Option<Session>, GatewayError> {
        let Some(session) = self.context.snapshot() else {
            return Ok(None);
        };

        match self.check_integrity(&session) {
            Integrity::Consistent(claims) => {
                let expiring = claims.is_some_and(|claims| {
                    claims.expires_within(self.settings.expiry_window.as_secs())
                });
                if !(expiring && session.remember) {
                    return Ok(Some(session));
                }
                debug!("identity token inside expiry window; refreshing before dispatch");
                self.renew_or_logout(&session, LogoutReason::RefreshFailed)
                    .await
                    .map(Some)
            }
            Integrity::Reconcilable(reason) => {
                info!(%reason, "reconciling identity token with live principal");
                self.renew_or_logout(&session, LogoutReason::Integrity)
                    .await
                    .map(Some)
            }
            Integrity::Broken(reason) => {
                warn!(%reason, "session failed integrity check");
                self.force_logout(LogoutReason::Integrity).await;
                Err(GatewayError::Integrity(reason))
            }
        }
    }

    fn check_integrity(&self, session: &Session) -> Integrity {
        let principal = self.identity.current_principal();
        if let Some(principal) = principal.as_ref() {
            if principal.uid != session.user_id {
                return Integrity::Broken(format!(
                    "session user `{}` does not match signed-in principal `{}`",
                    session.user_id, principal.uid
                ));
            }
        }

        let mismatch = match TokenClaims::decode(&session.identity_token) {
            Ok(claims) if claims.user_id == session.user_id => {
                return Integrity::Consistent(Some(claims));
            }
            Ok(claims) => format!(
                "token names user `{}` but session holds `{}`",
                claims.user_id, session.user_id
            ),
            Err(err) => format!("unreadable identity token: {err}"),
        };

        if principal.is_some() {
            Integrity::Reconcilable(mismatch)
        } else {
            Integrity::Broken(mismatch)
        }
    }

    /// Refresh and return the session carrying the new token, logging out on failure.
    async fn renew_or_logout(
        &self,
        session: &Session,
        reason: LogoutReason,
    ) -> Result<Session, GatewayError> {
        match self.refreshed_token(&session.identity_token).await {
            Ok(token) => Ok(Session {
                identity_token: token,
                ..session.clone()
            }),
            Err(err) => {
                warn!(%err, "token refresh failed");
                self.force_logout(reason).await;
                Err(err)
            }
        }
    }

    async fn recover_expired(
        &self,
        request: &ApiRequest,
        session: Option<Session>,
        err: GatewayError,
    ) -> Result<Value, GatewayError> {
        let Some(session) = session.filter(|session| session.remember) else {
            info!(path = %request.path, "token expired without remember preference");
            self.force_logout(LogoutReason::ExpiredWithoutRemember).await;
            return Err(err);
        };

        let renewed = self
            .renew_or_logout(&session, LogoutReason::RefreshFailed)
            .await?;

        debug!(path = %request.path, "replaying request with refreshed token");
        let prepared = request.prepare(&self.settings.api_key, Some(&renewed));
        let retry_err = match self.transport.dispatch(&prepared).await {
            Ok(body) => return Ok(body),
            Err(retry_err) => retry_err,
        };

        match classify(&retry_err, &self.settings.expiry_keyword) {
            ErrorClass::Expired => {
                warn!(path = %request.path, "refreshed token rejected as expired");
                self.force_logout(LogoutReason::RejectedAfterRefresh).await;
            }
            ErrorClass::SessionRevoked => {
                let status = retry_err.status_code().unwrap_or_default();
                self.force_logout(LogoutReason::Revoked { status }).await;
            }
            ErrorClass::Application | ErrorClass::Transport => {}
        }
        Err(retry_err)
    }

    /// A token newer than `stale`, refreshing through the coordinator if needed.
    ///
    /// A caller whose request went out with `stale` after another caller
    /// already refreshed picks up the current token without a new round trip.
    async fn refreshed_token(&self, stale: &str) -> Result<String, GatewayError> {
        match self.context.snapshot() {
            Some(current) if current.identity_token != stale => {
                debug!("session already carries a newer token");
                return Ok(current.identity_token);
            }
            Some(_) => {}
            None => return Err(GatewayError::NotAuthenticated),
        }
        self.refresh.run(|| self.refresh_session()).await
    }

    /// One identity-provider round trip. Never logs out; callers do.
    async fn refresh_session(&self) -> Result<String, GatewayError> {
        let epoch = self.context.epoch();
        let Some(session) = self.context.snapshot() else {
            return Err(GatewayError::NotAuthenticated);
        };
        if !self.context.begin_refresh() {
            return Err(GatewayError::NotAuthenticated);
        }
        let mut guard = RefreshStateGuard {
            context: &self.context,
            epoch,
            settled: false,
        };

        let result = self.fetch_fresh_token(&session).await;
        guard.settled = true;
        let token = result?;

        if !self.context.apply_refreshed_token(epoch, &token)? {
            debug!("session ended while refresh was in flight");
            return Err(GatewayError::NotAuthenticated);
        }
        info!(user_id = %session.user_id, "identity token refreshed");
        Ok(token)
    }

    async fn fetch_fresh_token(&self, session: &Session) -> Result<String, GatewayError> {
        let principal = self
            .identity
            .current_principal()
            .ok_or(IdentityError::NoPrincipal)?;
        if principal.uid != session.user_id {
            return Err(GatewayError::Integrity(format!(
                "principal `{}` cannot refresh session of `{}`",
                principal.uid, session.user_id
            )));
        }

        let (token, claims) = tokio::time::timeout(self.settings.refresh_timeout, async {
            let token = self.identity.get_token(&principal, true).await?;
            let claims = self.identity.token_claims(&principal).await?;
            Ok::<_, IdentityError>((token, claims))
        })
        .await
        .map_err(|_| IdentityError::TimedOut)??;

        if claims.user_id != session.user_id {
            return Err(GatewayError::Integrity(format!(
                "refreshed token names user `{}` instead of `{}`",
                claims.user_id, session.user_id
            )));
        }
        Ok(token)
    }

    /// Tear the session down and send the user to sign-in. Idempotent.
    async fn force_logout(&self, reason: LogoutReason) {
        self.context.begin_logout();
        match self.context.teardown() {
            Ok(Some(session)) => info!(user_id = %session.user_id, %reason, "session torn down"),
            Ok(None) => debug!(%reason, "logout with no active session"),
            Err(err) => warn!(%err, "failed to clear persisted session"),
        }
        if let Some(principal) = self.identity.current_principal() {
            if let Err(err) = self.identity.sign_out(&principal).await {
                warn!(%err, "identity provider sign-out failed");
            }
        }
        self.navigator.to_sign_in(&reason);
    }
}

/// Restores `Authenticated` when a refresh future is dropped before settling.
struct RefreshStateGuard<'a> {
    context: &'a SessionContext,
    epoch: u64,
    settled: bool,
}

impl Drop for RefreshStateGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.context.abandon_refresh(self.epoch);
        }
    }
}

/// Read the console role from the backend sign-in response.
fn role_from_login_response(response: &Value) -> Result<Role, GatewayError> {
    let raw = response
        .get("role")
        .or_else(|| response.get("data").and_then(|data| data.get("role")))
        .and_then(Value::as_str);
    match raw {
        None => Ok(Role::Admin),
        Some(raw) => Role::parse(raw).ok_or_else(|| {
            GatewayError::InvalidResponse(format!("backend returned unknown role `{raw}`"))
        }),
    }
}
