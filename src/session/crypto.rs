//! Machine-derived encryption-at-rest for the durable session file.
//!
//! A random data key encrypts each entry; the data key itself is wrapped
//! with a key derived (scrypt) from machine identity material and a random
//! salt. The wrapped key is derived once per file and reused for rewrites.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::storage::StorageError;

pub(crate) const SESSION_FILE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const MACHINE_KEY_CONTEXT: &str = "admin-gateway-session-kek-v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct EncryptedSessionFile {
    #[serde(default)]
    pub(crate) version: u32,
    #[serde(default)]
    pub(crate) encryption: EncryptionEnvelope,
    #[serde(default)]
    pub(crate) entries: BTreeMap<String, EncryptedRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct EncryptionEnvelope {
    #[serde(default)]
    pub(crate) salt: String,
    #[serde(default)]
    pub(crate) wrapped_dek_nonce: String,
    #[serde(default)]
    pub(crate) wrapped_dek_ciphertext: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct EncryptedRecord {
    #[serde(default)]
    pub(crate) nonce: String,
    #[serde(default)]
    pub(crate) ciphertext: String,
}

/// Unwrapped key material for one session file.
pub(crate) struct StoreKeys {
    dek: [u8; KEY_LEN],
    envelope: EncryptionEnvelope,
}

impl EncryptedSessionFile {
    /// A file with no key envelope carries no entries.
    pub(crate) fn is_blank(&self) -> bool {
        self.encryption.salt.is_empty() && self.entries.is_empty()
    }
}

/// Generate a fresh data key and wrap it with the machine key.
pub(crate) fn new_store_keys() -> Result<StoreKeys, StorageError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let kek = derive_machine_kek(&salt)?;

    let mut dek = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut dek);
    let (nonce, ciphertext) = encrypt_blob(&kek, &dek)?;

    Ok(StoreKeys {
        dek,
        envelope: EncryptionEnvelope {
            salt: B64.encode(salt),
            wrapped_dek_nonce: B64.encode(nonce),
            wrapped_dek_ciphertext: B64.encode(ciphertext),
        },
    })
}

/// Unwrap the data key and decrypt every entry.
pub(crate) fn open_file(
    file: &EncryptedSessionFile,
) -> Result<(BTreeMap<String, String>, StoreKeys), StorageError> {
    let salt = decode_fixed::<SALT_LEN>(&file.encryption.salt, "salt")?;
    let kek = derive_machine_kek(&salt)?;
    let wrapped_nonce =
        decode_fixed::<NONCE_LEN>(&file.encryption.wrapped_dek_nonce, "wrapped_dek_nonce")?;
    let wrapped_dek = decode_bytes(
        &file.encryption.wrapped_dek_ciphertext,
        "wrapped_dek_ciphertext",
    )?;
    let dek_raw = decrypt_blob(&kek, &wrapped_nonce, &wrapped_dek).map_err(|_| {
        StorageError::Invalid(
            "failed to decrypt session file (machine identity may have changed); sign in again"
                .to_string(),
        )
    })?;
    if dek_raw.len() != KEY_LEN {
        return Err(StorageError::Invalid(
            "invalid encrypted key material in session file".to_string(),
        ));
    }
    let mut dek = [0u8; KEY_LEN];
    dek.copy_from_slice(&dek_raw);

    let mut entries = BTreeMap::new();
    for (key, record) in &file.entries {
        let nonce = decode_fixed::<NONCE_LEN>(&record.nonce, "nonce")?;
        let ciphertext = decode_bytes(&record.ciphertext, "ciphertext")?;
        let plain = decrypt_blob(&dek, &nonce, &ciphertext).map_err(|_| {
            StorageError::Invalid(format!("failed to decrypt session entry `{key}`"))
        })?;
        let value = String::from_utf8(plain).map_err(|_| {
            StorageError::Invalid(format!("session entry `{key}` is not valid UTF-8"))
        })?;
        entries.insert(key.clone(), value);
    }

    Ok((
        entries,
        StoreKeys {
            dek,
            envelope: file.encryption.clone(),
        },
    ))
}

/// Encrypt entries under existing key material.
pub(crate) fn seal_file(
    keys: &StoreKeys,
    entries: &BTreeMap<String, String>,
) -> Result<EncryptedSessionFile, StorageError> {
    let mut sealed = BTreeMap::new();
    for (key, value) in entries {
        let (nonce, ciphertext) = encrypt_blob(&keys.dek, value.as_bytes())?;
        sealed.insert(
            key.clone(),
            EncryptedRecord {
                nonce: B64.encode(nonce),
                ciphertext: B64.encode(ciphertext),
            },
        );
    }
    Ok(EncryptedSessionFile {
        version: SESSION_FILE_VERSION,
        encryption: keys.envelope.clone(),
        entries: sealed,
    })
}

fn derive_machine_kek(salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], StorageError> {
    let mut material = machine_secret_material();
    material.extend_from_slice(salt);

    let mut hashed = Sha256::new();
    hashed.update(MACHINE_KEY_CONTEXT.as_bytes());
    hashed.update(&material);
    let seed = hashed.finalize();

    let params = ScryptParams::recommended();
    let mut key = [0u8; KEY_LEN];
    scrypt(&seed, salt, &params, &mut key)
        .map_err(|err| StorageError::Invalid(format!("failed to derive session key: {err}")))?;
    Ok(key)
}

fn machine_secret_material() -> Vec<u8> {
    let hostname = hostname::get()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let home = dirs::home_dir()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    let machine_id = read_machine_id().unwrap_or_default();
    format!(
        "os={}|host={hostname}|user={username}|home={home}|machine_id={machine_id}",
        std::env::consts::OS
    )
    .into_bytes()
}

fn read_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostid"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn encrypt_blob(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), StorageError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| StorageError::Invalid("invalid encryption key length".to_string()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| StorageError::Invalid("failed to encrypt session data".to_string()))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn decrypt_blob(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, StorageError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| StorageError::Invalid("invalid encryption key length".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::Invalid("failed to decrypt session data".to_string()))
}

fn decode_bytes(value: &str, field: &str) -> Result<Vec<u8>, StorageError> {
    B64.decode(value).map_err(|err| {
        StorageError::Invalid(format!("failed to decode session file field `{field}`: {err}"))
    })
}

fn decode_fixed<const N: usize>(value: &str, field: &str) -> Result<[u8; N], StorageError> {
    let bytes = decode_bytes(value, field)?;
    if bytes.len() != N {
        return Err(StorageError::Invalid(format!(
            "invalid session file field `{field}` length: expected {N}, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
