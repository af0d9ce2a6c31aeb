//! Key/value storage capability backing the persisted session.
//!
//! `MemoryStorage` lives as long as the process (the session-scoped store);
//! `FileStorage` survives restarts and keeps values encrypted on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::crypto::{new_store_keys, open_file, seal_file, EncryptedSessionFile, StoreKeys};

/// Errors raised by a [`SessionStorage`] backend.
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Invalid(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Minimal string key/value store, the shape of browser storage.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-process storage cleared when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries().clear();
        Ok(())
    }
}

/// Durable storage in one encrypted JSON file.
///
/// The file is read once and cached; every mutation rewrites it with
/// owner-only permissions.
pub struct FileStorage {
    path: PathBuf,
    state: Mutex<Option<LoadedFile>>,
}

struct LoadedFile {
    entries: BTreeMap<String, String>,
    keys: Option<StoreKeys>,
}

impl LoadedFile {
    fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            keys: None,
        }
    }
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_loaded<T>(
        &self,
        f: impl FnOnce(&mut LoadedFile) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_none() {
            *state = Some(load_file(&self.path)?);
        }
        match state.as_mut() {
            Some(loaded) => f(loaded),
            None => Err(StorageError::Invalid("session file not loaded".to_string())),
        }
    }

    fn persist(&self, loaded: &mut LoadedFile) -> Result<(), StorageError> {
        if loaded.keys.is_none() {
            loaded.keys = Some(new_store_keys()?);
        }
        let Some(keys) = loaded.keys.as_ref() else {
            return Err(StorageError::Invalid("missing session key material".to_string()));
        };
        let sealed = seal_file(keys, &loaded.entries)?;
        write_file(&self.path, &sealed)
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_loaded(|loaded| Ok(loaded.entries.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_loaded(|loaded| {
            loaded.entries.insert(key.to_string(), value.to_string());
            self.persist(loaded)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_loaded(|loaded| {
            if loaded.entries.remove(key).is_none() {
                return Ok(());
            }
            self.persist(loaded)
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.with_loaded(|loaded| {
            loaded.entries.clear();
            match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StorageError::Io(err)),
            }
        })
    }
}

/// Read the session file, discarding it when it cannot be parsed or decrypted.
fn load_file(path: &Path) -> Result<LoadedFile, StorageError> {
    match read_file(path) {
        Err(StorageError::Invalid(reason)) => {
            warn!(%reason, path = %path.display(), "discarding unreadable session file");
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
            Ok(LoadedFile::empty())
        }
        other => other,
    }
}

fn read_file(path: &Path) -> Result<LoadedFile, StorageError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(LoadedFile::empty()),
        Err(err) => return Err(StorageError::Io(err)),
    };
    let file: EncryptedSessionFile = serde_json::from_str(&text).map_err(|err| {
        StorageError::Invalid(format!(
            "failed to parse session file `{}`: {err}",
            path.display()
        ))
    })?;
    if file.is_blank() {
        return Ok(LoadedFile::empty());
    }
    let (entries, keys) = open_file(&file)?;
    Ok(LoadedFile {
        entries,
        keys: Some(keys),
    })
}

fn write_file(path: &Path, file: &EncryptedSessionFile) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
        }
    }

    let text = serde_json::to_string_pretty(file)
        .map_err(|err| StorageError::Invalid(format!("failed to serialize session file: {err}")))?;
    let mut options = std::fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut handle = options.open(path)?;
    handle.write_all(text.as_bytes())?;
    handle.flush()?;
    Ok(())
}
