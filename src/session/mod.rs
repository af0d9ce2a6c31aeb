//! Client-side session model and lifecycle.
//!
//! [`SessionContext`] is the single owner of the signed-in identity. It is
//! created once, restored from storage with [`SessionContext::init`], and
//! handed to the gateway; nothing else mutates session state.

mod crypto;
mod storage;
mod store;

pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError};
pub use store::{SessionStore, StoredSession};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Which console principal the session belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Admin,
    SubAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SubAdmin => "sub_admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "admin" => Some(Self::Admin),
            "sub_admin" | "subadmin" => Some(Self::SubAdmin),
            _ => None,
        }
    }
}

/// Where session data is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Survives process restarts.
    Durable,
    /// Dropped when the process exits.
    Session,
}

impl Persistence {
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            Self::Durable
        } else {
            Self::Session
        }
    }
}

/// The authenticated identity held by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity_token: String,
    pub user_id: String,
    pub remember: bool,
    pub role: Role,
}

/// Lifecycle state of the logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    RefreshInFlight,
    LoggingOut,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unauthenticated, Authenticated)
                | (Authenticated, RefreshInFlight)
                | (RefreshInFlight, Authenticated)
                | (RefreshInFlight, LoggingOut)
                | (Authenticated, LoggingOut)
                | (LoggingOut, Unauthenticated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::RefreshInFlight => "refresh-in-flight",
            Self::LoggingOut => "logging-out",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct ContextInner {
    session: Option<Session>,
    state: SessionState,
    /// Bumped on every sign-in and teardown; stale refresh results compare against it.
    epoch: u64,
}

/// Shared session context injected into the gateway.
pub struct SessionContext {
    store: SessionStore,
    inner: RwLock<ContextInner>,
}

impl SessionContext {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            inner: RwLock::new(ContextInner {
                session: None,
                state: SessionState::Unauthenticated,
                epoch: 0,
            }),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Restore the session from storage.
    ///
    /// Partial or inconsistent records are wiped and the context stays
    /// unauthenticated.
    pub fn init(&self) -> Result<Option<Session>, StorageError> {
        let loaded = self.store.load()?;
        let mut inner = self.write();
        match loaded {
            StoredSession::Complete(session) => {
                debug!(user_id = %session.user_id, role = session.role.as_str(), "restored session");
                inner.session = Some(session.clone());
                inner.state = SessionState::Authenticated;
                inner.epoch = inner.epoch.wrapping_add(1);
                Ok(Some(session))
            }
            StoredSession::Partial(reason) => {
                warn!(%reason, "discarding partial session record");
                inner.session = None;
                inner.state = SessionState::Unauthenticated;
                self.store.clear()?;
                Ok(None)
            }
            StoredSession::Empty => Ok(None),
        }
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.read().session.clone()
    }

    pub fn state(&self) -> SessionState {
        self.read().state
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Install a freshly signed-in session, replacing any previous one.
    pub fn establish(&self, session: Session) -> Result<(), StorageError> {
        let mut inner = self.write();
        self.store.clear()?;
        self.store.save(&session)?;
        info!(user_id = %session.user_id, role = session.role.as_str(), remember = session.remember, "session established");
        inner.session = Some(session);
        inner.state = SessionState::Authenticated;
        inner.epoch = inner.epoch.wrapping_add(1);
        Ok(())
    }

    /// Mark a refresh as started. Returns false when there is no session to refresh.
    pub(crate) fn begin_refresh(&self) -> bool {
        let mut inner = self.write();
        if inner.session.is_none() {
            return false;
        }
        transition(&mut inner, SessionState::RefreshInFlight);
        true
    }

    /// Store a refreshed token unless the session was torn down or replaced meanwhile.
    ///
    /// Returns `Ok(false)` when the result was discarded.
    pub(crate) fn apply_refreshed_token(
        &self,
        epoch: u64,
        token: &str,
    ) -> Result<bool, StorageError> {
        let mut inner = self.write();
        if inner.epoch != epoch {
            debug!("discarding refresh result for a superseded session");
            return Ok(false);
        }
        let Some(session) = inner.session.as_mut() else {
            return Ok(false);
        };
        session.identity_token = token.to_string();
        let updated = session.clone();
        self.store.save(&updated)?;
        transition(&mut inner, SessionState::Authenticated);
        Ok(true)
    }

    /// Undo `begin_refresh` when a refresh was dropped before it settled.
    pub(crate) fn abandon_refresh(&self, epoch: u64) {
        let mut inner = self.write();
        if inner.epoch == epoch && inner.state == SessionState::RefreshInFlight {
            transition(&mut inner, SessionState::Authenticated);
        }
    }

    pub(crate) fn begin_logout(&self) {
        let mut inner = self.write();
        if matches!(
            inner.state,
            SessionState::Authenticated | SessionState::RefreshInFlight
        ) {
            transition(&mut inner, SessionState::LoggingOut);
        }
    }

    /// Drop the session from memory and storage.
    ///
    /// Memory is cleared before storage so no later request can pick up the
    /// old credential even when storage cleanup fails. Safe to call when
    /// already empty.
    pub fn teardown(&self) -> Result<Option<Session>, StorageError> {
        let removed = {
            let mut inner = self.write();
            let removed = inner.session.take();
            inner.epoch = inner.epoch.wrapping_add(1);
            if inner.state != SessionState::Unauthenticated {
                if inner.state != SessionState::LoggingOut {
                    transition(&mut inner, SessionState::LoggingOut);
                }
                transition(&mut inner, SessionState::Unauthenticated);
            }
            removed
        };
        self.store.clear()?;
        Ok(removed)
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContextInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn transition(inner: &mut ContextInner, next: SessionState) {
    if inner.state == next {
        return;
    }
    if !inner.state.can_transition_to(next) {
        warn!(from = %inner.state, to = %next, "unexpected session state transition");
    }
    debug!(from = %inner.state, to = %next, "session state");
    inner.state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn context() -> (Arc<MemoryStorage>, SessionContext) {
        let durable = Arc::new(MemoryStorage::new());
        let volatile = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(durable.clone(), volatile);
        (durable, SessionContext::new(store))
    }

    fn session() -> Session {
        Session {
            identity_token: "tok-1".into(),
            user_id: "admin-1".into(),
            remember: true,
            role: Role::Admin,
        }
    }

    #[test]
    fn role_parsing_accepts_known_spellings() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("Sub-Admin"), Some(Role::SubAdmin));
        assert_eq!(Role::parse("subadmin"), Some(Role::SubAdmin));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn state_machine_rejects_unauthenticated_refresh() {
        assert!(!SessionState::Unauthenticated.can_transition_to(SessionState::RefreshInFlight));
        assert!(SessionState::Authenticated.can_transition_to(SessionState::RefreshInFlight));
        assert!(SessionState::RefreshInFlight.can_transition_to(SessionState::LoggingOut));
        assert!(SessionState::LoggingOut.can_transition_to(SessionState::Unauthenticated));
        assert!(!SessionState::LoggingOut.can_transition_to(SessionState::Authenticated));
    }

    #[test]
    fn init_restores_complete_session() {
        let (_durable, ctx) = context();
        ctx.store().save(&session()).unwrap();
        assert_eq!(ctx.init().unwrap(), Some(session()));
        assert_eq!(ctx.state(), SessionState::Authenticated);
    }

    #[test]
    fn init_wipes_partial_session() {
        let (durable, ctx) = context();
        durable.set("identity_token", "orphan").unwrap();
        assert_eq!(ctx.init().unwrap(), None);
        assert_eq!(ctx.state(), SessionState::Unauthenticated);
        assert_eq!(durable.get("identity_token").unwrap(), None);
    }

    #[test]
    fn refresh_result_is_discarded_after_teardown() {
        let (_durable, ctx) = context();
        ctx.establish(session()).unwrap();
        let epoch = ctx.epoch();
        assert!(ctx.begin_refresh());
        ctx.begin_logout();
        ctx.teardown().unwrap();
        assert!(!ctx.apply_refreshed_token(epoch, "tok-2").unwrap());
        assert_eq!(ctx.snapshot(), None);
        assert_eq!(ctx.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn refreshed_token_is_persisted() {
        let (durable, ctx) = context();
        ctx.establish(session()).unwrap();
        let epoch = ctx.epoch();
        assert!(ctx.begin_refresh());
        assert_eq!(ctx.state(), SessionState::RefreshInFlight);
        assert!(ctx.apply_refreshed_token(epoch, "tok-2").unwrap());
        assert_eq!(ctx.state(), SessionState::Authenticated);
        assert_eq!(durable.get("identity_token").unwrap().as_deref(), Some("tok-2"));
    }

    #[test]
    fn teardown_is_idempotent() {
        let (_durable, ctx) = context();
        assert_eq!(ctx.teardown().unwrap(), None);
        ctx.establish(session()).unwrap();
        assert_eq!(ctx.teardown().unwrap(), Some(session()));
        assert_eq!(ctx.teardown().unwrap(), None);
        assert_eq!(ctx.state(), SessionState::Unauthenticated);
    }
}
