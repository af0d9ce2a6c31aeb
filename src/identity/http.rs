//! HTTP identity provider speaking the Identity Toolkit / secure-token REST API.
//!
//! Email/password sign-in returns an identity token plus a long-lived refresh
//! token; the refresh token is exchanged for new identity tokens on demand.
//! The attached principal is persisted next to the session so a remembered
//! sign-in survives restarts.

use serde::Deserialize;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

use super::claims::TokenClaims;
use super::error::IdentityError;
use super::types::{unix_now_secs, Credentials, Principal, SignedIn};
use super::IdentityProvider;
use crate::session::{Persistence, SessionStore};
use async_trait::async_trait;

/// Storage key holding the serialized principal.
const PRINCIPAL_KEY: &str = "principal";
/// Cached tokens this close to expiry are re-minted instead of reused.
const TOKEN_SAFETY_WINDOW_SECS: i64 = 90;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Provider endpoint configuration.
#[derive(Debug, Clone)]
pub struct IdentityEndpoints {
    pub sign_in_url: String,
    pub refresh_url: String,
    /// Public project key sent as the `key` query parameter.
    pub api_key: String,
}

/// `accounts:signInWithPassword` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    local_id: Option<String>,
    email: Option<String>,
    #[serde(deserialize_with = "deserialize_i64_option", default)]
    expires_in: Option<i64>,
}

/// Secure-token `grant_type=refresh_token` response.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<String>,
    #[serde(deserialize_with = "deserialize_i64_option", default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at_unix: i64,
}

#[derive(Debug, Clone)]
struct Attached {
    principal: Principal,
    persistence: Persistence,
    token: Option<CachedToken>,
}

/// Identity provider backed by the Identity Toolkit REST endpoints.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    endpoints: IdentityEndpoints,
    store: SessionStore,
    attached: RwLock<Option<Attached>>,
}

impl HttpIdentityProvider {
    /// Build the provider and re-attach any persisted principal.
    pub fn new(
        http: reqwest::Client,
        endpoints: IdentityEndpoints,
        store: SessionStore,
    ) -> Result<Self, IdentityError> {
        let attached = restore_principal(&store)?;
        if let Some(found) = attached.as_ref() {
            debug!(uid = %found.principal.uid, "re-attached persisted principal");
        }
        Ok(Self {
            http,
            endpoints,
            store,
            attached: RwLock::new(attached),
        })
    }

    fn attached(&self) -> Option<Attached> {
        self.attached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attach(&self, attached: Attached) -> Result<(), IdentityError> {
        let serialized = serde_json::to_string(&attached.principal).map_err(|err| {
            IdentityError::Invalid(format!("failed to serialize principal: {err}"))
        })?;
        let other = match attached.persistence {
            Persistence::Durable => Persistence::Session,
            Persistence::Session => Persistence::Durable,
        };
        self.store.storage_for(other).remove(PRINCIPAL_KEY)?;
        self.store
            .storage_for(attached.persistence)
            .set(PRINCIPAL_KEY, &serialized)?;
        *self.attached.write().unwrap_or_else(PoisonError::into_inner) = Some(attached);
        Ok(())
    }

    fn with_query(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.endpoints.api_key.trim().is_empty() {
            builder
        } else {
            builder.query(&[("key", self.endpoints.api_key.as_str())])
        }
    }

    async fn exchange_refresh_token(
        &self,
        principal: &Principal,
    ) -> Result<(CachedToken, String), IdentityError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", principal.refresh_token.as_str()),
        ];
        let response = self
            .with_query(self.http.post(&self.endpoints.refresh_url))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection_or_status(response).await);
        }

        let payload: RefreshResponse = response.json().await?;
        let value = payload.id_token.unwrap_or_default().trim().to_string();
        if value.is_empty() {
            return Err(IdentityError::Invalid(
                "token refresh response did not include id_token".to_string(),
            ));
        }
        if let Some(user_id) = payload.user_id.as_deref() {
            if user_id != principal.uid {
                return Err(IdentityError::Invalid(format!(
                    "token refresh returned user `{user_id}` for principal `{}`",
                    principal.uid
                )));
            }
        }
        let refresh_token = payload
            .refresh_token
            .unwrap_or_else(|| principal.refresh_token.clone())
            .trim()
            .to_string();
        let expires_in = payload
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .max(60);
        Ok((
            CachedToken {
                value,
                expires_at_unix: unix_now_secs().saturating_add(expires_in),
            },
            refresh_token,
        ))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(
        &self,
        credentials: &Credentials,
        persistence: Persistence,
    ) -> Result<SignedIn, IdentityError> {
        let response = self
            .with_query(self.http.post(&self.endpoints.sign_in_url))
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
                "returnSecureToken": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection_or_status(response).await);
        }

        let payload: SignInResponse = response.json().await?;
        let identity_token = payload.id_token.unwrap_or_default().trim().to_string();
        let refresh_token = payload.refresh_token.unwrap_or_default().trim().to_string();
        if identity_token.is_empty() || refresh_token.is_empty() {
            return Err(IdentityError::Invalid(
                "sign-in response did not include idToken and refreshToken".to_string(),
            ));
        }
        let uid = match payload.local_id.filter(|id| !id.trim().is_empty()) {
            Some(uid) => uid,
            None => TokenClaims::decode(&identity_token)?.user_id,
        };

        let principal = Principal {
            uid,
            email: payload.email.or_else(|| Some(credentials.email.clone())),
            refresh_token,
        };
        let expires_in = payload
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .max(60);
        self.attach(Attached {
            principal: principal.clone(),
            persistence,
            token: Some(CachedToken {
                value: identity_token.clone(),
                expires_at_unix: unix_now_secs().saturating_add(expires_in),
            }),
        })?;
        debug!(uid = %principal.uid, "identity provider sign-in succeeded");

        Ok(SignedIn {
            principal,
            identity_token,
        })
    }

    async fn get_token(
        &self,
        principal: &Principal,
        force_refresh: bool,
    ) -> Result<String, IdentityError> {
        let attached = self.attached();
        if !force_refresh {
            let cached = attached
                .as_ref()
                .filter(|found| found.principal.uid == principal.uid)
                .and_then(|found| found.token.as_ref())
                .filter(|token| {
                    unix_now_secs().saturating_add(TOKEN_SAFETY_WINDOW_SECS) < token.expires_at_unix
                });
            if let Some(token) = cached {
                return Ok(token.value.clone());
            }
        }

        let (token, refresh_token) = self.exchange_refresh_token(principal).await?;
        if let Some(current) = attached.filter(|found| found.principal.uid == principal.uid) {
            let mut principal = current.principal;
            principal.refresh_token = refresh_token;
            self.attach(Attached {
                principal,
                persistence: current.persistence,
                token: Some(token.clone()),
            })?;
        }
        Ok(token.value)
    }

    async fn token_claims(&self, principal: &Principal) -> Result<TokenClaims, IdentityError> {
        let token = self.get_token(principal, false).await?;
        TokenClaims::decode(&token)
    }

    async fn sign_out(&self, principal: &Principal) -> Result<(), IdentityError> {
        {
            let mut attached = self.attached.write().unwrap_or_else(PoisonError::into_inner);
            if attached
                .as_ref()
                .is_some_and(|found| found.principal.uid == principal.uid)
            {
                *attached = None;
            }
        }
        let durable = self.store.storage_for(Persistence::Durable).remove(PRINCIPAL_KEY);
        let volatile = self.store.storage_for(Persistence::Session).remove(PRINCIPAL_KEY);
        durable.and(volatile)?;
        debug!(uid = %principal.uid, "identity provider signed out");
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        self.attached().map(|found| found.principal)
    }
}

fn restore_principal(store: &SessionStore) -> Result<Option<Attached>, IdentityError> {
    for persistence in [Persistence::Session, Persistence::Durable] {
        let storage = store.storage_for(persistence);
        let Some(raw) = storage.get(PRINCIPAL_KEY)? else {
            continue;
        };
        match serde_json::from_str::<Principal>(&raw) {
            Ok(principal) => {
                return Ok(Some(Attached {
                    principal,
                    persistence,
                    token: None,
                }))
            }
            Err(err) => {
                warn!(%err, "dropping unreadable persisted principal");
                storage.remove(PRINCIPAL_KEY)?;
            }
        }
    }
    Ok(None)
}

/// Map a failed provider response to `Rejected` when it carries a provider error code.
async fn rejection_or_status(response: reqwest::Response) -> IdentityError {
    let code = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if code == 400 || code == 401 || code == 403 {
        let reason = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                let error = value.get("error")?;
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .or_else(|| error.as_str())
                    .map(str::to_string)
            });
        if let Some(reason) = reason {
            return IdentityError::Rejected(reason);
        }
    }
    IdentityError::Status(code, body)
}

/// Deserialize optional integer durations encoded as string/number/null.
fn deserialize_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(num) => num
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("expires_in must be an integer"))
            .map(Some),
        serde_json::Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|err| serde::de::Error::custom(format!("invalid expires_in: {err}"))),
        _ => Err(serde::de::Error::custom(
            "expires_in must be string, number, or null",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryStorage, SessionStorage};
    use crate::testsupport::{fake_jwt, OneShotHttpServer};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryStorage>, Arc<MemoryStorage>, SessionStore) {
        let durable = Arc::new(MemoryStorage::new());
        let volatile = Arc::new(MemoryStorage::new());
        (
            durable.clone(),
            volatile.clone(),
            SessionStore::new(durable, volatile),
        )
    }

    fn endpoints(base: &str) -> IdentityEndpoints {
        IdentityEndpoints {
            sign_in_url: format!("{base}/v1/accounts:signInWithPassword"),
            refresh_url: format!("{base}/v1/token"),
            api_key: "project-key".to_string(),
        }
    }

    #[tokio::test]
    async fn authenticate_persists_principal_by_persistence() {
        let token = fake_jwt(json!({ "user_id": "uid-1", "exp": 4_000_000_000i64 }));
        let body = json!({
            "idToken": token,
            "refreshToken": "refresh-1",
            "localId": "uid-1",
            "email": "ops@example.com",
            "expiresIn": "3600"
        })
        .to_string();
        let server = OneShotHttpServer::start(vec![(200, body)]).await;
        let (durable, volatile, store) = store();
        let provider =
            HttpIdentityProvider::new(reqwest::Client::new(), endpoints(&server.base_url()), store)
                .unwrap();

        let signed_in = provider
            .authenticate(
                &Credentials::new("ops@example.com", "pw"),
                Persistence::Session,
            )
            .await
            .expect("sign-in");
        assert_eq!(signed_in.principal.uid, "uid-1");
        assert_eq!(signed_in.identity_token, token);
        assert!(volatile.get(PRINCIPAL_KEY).unwrap().is_some());
        assert!(durable.get(PRINCIPAL_KEY).unwrap().is_none());
        assert_eq!(provider.current_principal().map(|p| p.uid).as_deref(), Some("uid-1"));

        // Cached token is reused without a network call.
        let cached = provider
            .get_token(&signed_in.principal, false)
            .await
            .expect("cached token");
        assert_eq!(cached, token);

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("key=project-key"), "{}", requests[0]);
    }

    #[tokio::test]
    async fn rejected_credentials_surface_provider_reason() {
        let body = json!({ "error": { "code": 400, "message": "INVALID_LOGIN_CREDENTIALS" } })
            .to_string();
        let server = OneShotHttpServer::start(vec![(400, body)]).await;
        let (_durable, _volatile, store) = store();
        let provider =
            HttpIdentityProvider::new(reqwest::Client::new(), endpoints(&server.base_url()), store)
                .unwrap();
        let err = provider
            .authenticate(&Credentials::new("a@b.c", "bad"), Persistence::Durable)
            .await
            .expect_err("bad credentials");
        assert!(matches!(err, IdentityError::Rejected(ref r) if r == "INVALID_LOGIN_CREDENTIALS"));
        assert!(provider.current_principal().is_none());
    }

    #[tokio::test]
    async fn forced_refresh_rotates_refresh_token() {
        let fresh = fake_jwt(json!({ "user_id": "uid-2", "exp": 4_000_000_000i64 }));
        let body = json!({
            "id_token": fresh,
            "refresh_token": "refresh-rotated",
            "user_id": "uid-2",
            "expires_in": "3600"
        })
        .to_string();
        let server = OneShotHttpServer::start(vec![(200, body)]).await;
        let (durable, _volatile, store) = store();
        let principal = Principal {
            uid: "uid-2".into(),
            email: None,
            refresh_token: "refresh-old".into(),
        };
        durable
            .set(PRINCIPAL_KEY, &serde_json::to_string(&principal).unwrap())
            .unwrap();
        let provider =
            HttpIdentityProvider::new(reqwest::Client::new(), endpoints(&server.base_url()), store)
                .unwrap();

        let token = provider.get_token(&principal, true).await.expect("refresh");
        assert_eq!(token, fresh);
        let stored: Principal =
            serde_json::from_str(&durable.get(PRINCIPAL_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.refresh_token, "refresh-rotated");

        // Claims come from the freshly cached token, not another exchange.
        let claims = provider.token_claims(&principal).await.expect("claims");
        assert_eq!(claims.user_id, "uid-2");

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("grant_type=refresh_token"), "{}", requests[0]);
        assert!(requests[0].contains("refresh_token=refresh-old"), "{}", requests[0]);
    }

    #[tokio::test]
    async fn refresh_for_another_user_is_invalid() {
        let body = json!({
            "id_token": fake_jwt(json!({ "user_id": "intruder", "exp": 4_000_000_000i64 })),
            "user_id": "intruder"
        })
        .to_string();
        let server = OneShotHttpServer::start(vec![(200, body)]).await;
        let (_durable, _volatile, store) = store();
        let provider =
            HttpIdentityProvider::new(reqwest::Client::new(), endpoints(&server.base_url()), store)
                .unwrap();
        let principal = Principal {
            uid: "uid-3".into(),
            email: None,
            refresh_token: "r".into(),
        };
        let err = provider
            .get_token(&principal, true)
            .await
            .expect_err("mismatched user");
        assert!(matches!(err, IdentityError::Invalid(_)), "got: {err}");
    }

    #[tokio::test]
    async fn sign_out_removes_persisted_principal() {
        let (durable, _volatile, store) = store();
        let principal = Principal {
            uid: "uid-4".into(),
            email: None,
            refresh_token: "r".into(),
        };
        durable
            .set(PRINCIPAL_KEY, &serde_json::to_string(&principal).unwrap())
            .unwrap();
        let provider = HttpIdentityProvider::new(
            reqwest::Client::new(),
            endpoints("http://127.0.0.1:9"),
            store,
        )
        .unwrap();
        assert_eq!(provider.current_principal(), Some(principal.clone()));
        provider.sign_out(&principal).await.unwrap();
        assert!(provider.current_principal().is_none());
        assert!(durable.get(PRINCIPAL_KEY).unwrap().is_none());
        // Second sign-out is a no-op.
        provider.sign_out(&principal).await.unwrap();
    }

    #[test]
    fn unreadable_principal_is_dropped_on_restore() {
        let (durable, _volatile, store) = store();
        durable.set(PRINCIPAL_KEY, "{not json").unwrap();
        let provider = HttpIdentityProvider::new(
            reqwest::Client::new(),
            endpoints("http://127.0.0.1:9"),
            store,
        )
        .unwrap();
        assert!(provider.current_principal().is_none());
        assert!(durable.get(PRINCIPAL_KEY).unwrap().is_none());
    }
}
