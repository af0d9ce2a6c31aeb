//! Session record persistence across the durable and session-scoped stores.

use std::sync::Arc;

use super::storage::{SessionStorage, StorageError};
use super::{Persistence, Role, Session};

const KEY_IDENTITY_TOKEN: &str = "identity_token";
const KEY_USER_ID: &str = "user_id";
const KEY_REMEMBER: &str = "remember";
const KEY_ROLE: &str = "role";
const SESSION_KEYS: [&str; 4] = [KEY_IDENTITY_TOKEN, KEY_USER_ID, KEY_REMEMBER, KEY_ROLE];

/// What a storage backend currently holds for the session keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredSession {
    Empty,
    Complete(Session),
    /// Some keys are present but they do not form a valid session.
    Partial(String),
}

/// Routes session reads and writes by remember preference.
///
/// Remembered sessions go to the durable store, the rest to the
/// session-scoped store. Only one of the two ever holds session keys.
#[derive(Clone)]
pub struct SessionStore {
    durable: Arc<dyn SessionStorage>,
    volatile: Arc<dyn SessionStorage>,
}

impl SessionStore {
    pub fn new(durable: Arc<dyn SessionStorage>, volatile: Arc<dyn SessionStorage>) -> Self {
        Self { durable, volatile }
    }

    /// Backend used for a given persistence mode.
    pub fn storage_for(&self, persistence: Persistence) -> Arc<dyn SessionStorage> {
        match persistence {
            Persistence::Durable => Arc::clone(&self.durable),
            Persistence::Session => Arc::clone(&self.volatile),
        }
    }

    /// Read the session, preferring the session-scoped store.
    pub fn load(&self) -> Result<StoredSession, StorageError> {
        match read_session(self.volatile.as_ref())? {
            StoredSession::Empty => read_session(self.durable.as_ref()),
            found => Ok(found),
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        let persistence = Persistence::from_remember(session.remember);
        let (target, other) = match persistence {
            Persistence::Durable => (&self.durable, &self.volatile),
            Persistence::Session => (&self.volatile, &self.durable),
        };
        remove_session_keys(other.as_ref())?;
        target.set(KEY_IDENTITY_TOKEN, &session.identity_token)?;
        target.set(KEY_USER_ID, &session.user_id)?;
        target.set(KEY_REMEMBER, if session.remember { "true" } else { "false" })?;
        target.set(KEY_ROLE, session.role.as_str())?;
        Ok(())
    }

    /// Remove session keys from both backends.
    ///
    /// Both backends are attempted even when the first one fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        let volatile = remove_session_keys(self.volatile.as_ref());
        let durable = remove_session_keys(self.durable.as_ref());
        volatile.and(durable)
    }
}

fn remove_session_keys(storage: &dyn SessionStorage) -> Result<(), StorageError> {
    for key in SESSION_KEYS {
        storage.remove(key)?;
    }
    Ok(())
}

fn read_session(storage: &dyn SessionStorage) -> Result<StoredSession, StorageError> {
    let token = non_empty(storage.get(KEY_IDENTITY_TOKEN)?);
    let user_id = non_empty(storage.get(KEY_USER_ID)?);
    let remember = storage.get(KEY_REMEMBER)?;
    let role = storage.get(KEY_ROLE)?;

    match (token, user_id) {
        (None, None) if remember.is_none() && role.is_none() => Ok(StoredSession::Empty),
        (Some(identity_token), Some(user_id)) => {
            let role = match role.as_deref() {
                None => Role::Admin,
                Some(raw) => match Role::parse(raw) {
                    Some(role) => role,
                    None => return Ok(StoredSession::Partial(format!("unknown role `{raw}`"))),
                },
            };
            Ok(StoredSession::Complete(Session {
                identity_token,
                user_id,
                remember: remember.as_deref() == Some("true"),
                role,
            }))
        }
        (Some(_), None) => Ok(StoredSession::Partial("token without user id".to_string())),
        (None, Some(_)) => Ok(StoredSession::Partial("user id without token".to_string())),
        (None, None) => Ok(StoredSession::Partial(
            "session flags without credentials".to_string(),
        )),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
