use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use super::error::SessionError;
use super::token::{Credential, SessionMeta};

const CREDENTIAL_FILE_VERSION: u32 = 1;
const CREDENTIAL_FILE_NAME: &str = "credentials.toml";

/// Named secrets persisted across process restarts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum SecretKey {
    AccessToken,
    RefreshToken,
    UserRecord,
    RegisteredAt,
    NewAccount,
    SelectedFamily,
    LastRefreshAt,
}

/// Durable key/value persistence for credentials and session metadata.
///
/// Every call may fail with [`SessionError::StorageUnavailable`]; callers
/// treat that as "absent" (see [`read_or_absent`]).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: SecretKey) -> Result<Option<String>, SessionError>;
    async fn set(&self, key: SecretKey, value: &str) -> Result<(), SessionError>;
    async fn delete(&self, key: SecretKey) -> Result<(), SessionError>;
}

/// Read a secret, downgrading storage failures to `None`.
pub async fn read_or_absent(store: &dyn CredentialStore, key: SecretKey) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "Credential storage read failed; treating as absent");
            None
        }
    }
}

/// Current credential, if an access token is stored.
pub async fn load_credential(store: &dyn CredentialStore) -> Option<Credential> {
    let access_token = read_or_absent(store, SecretKey::AccessToken).await?;
    let refresh_token = read_or_absent(store, SecretKey::RefreshToken).await;
    Some(Credential {
        access_token,
        refresh_token,
    })
}

/// Persist a credential. A missing refresh token keeps the stored one.
pub async fn save_credential(
    store: &dyn CredentialStore,
    credential: &Credential,
) -> Result<(), SessionError> {
    store
        .set(SecretKey::AccessToken, &credential.access_token)
        .await?;
    if let Some(refresh_token) = &credential.refresh_token {
        store.set(SecretKey::RefreshToken, refresh_token).await?;
    }
    Ok(())
}

/// Registration metadata; unreadable or malformed values count as absent.
pub async fn load_session_meta(store: &dyn CredentialStore) -> SessionMeta {
    let registered_at = read_or_absent(store, SecretKey::RegisteredAt)
        .await
        .and_then(|raw| parse_epoch_ms(&raw));
    let is_new_account = read_or_absent(store, SecretKey::NewAccount)
        .await
        .map(|raw| raw == "true")
        .unwrap_or(false);
    SessionMeta {
        registered_at,
        is_new_account,
    }
}

pub async fn save_session_meta(
    store: &dyn CredentialStore,
    meta: &SessionMeta,
) -> Result<(), SessionError> {
    match meta.registered_at {
        Some(at) => {
            store
                .set(SecretKey::RegisteredAt, &at.timestamp_millis().to_string())
                .await?
        }
        None => store.delete(SecretKey::RegisteredAt).await?,
    }
    store
        .set(SecretKey::NewAccount, if meta.is_new_account { "true" } else { "false" })
        .await
}

/// Remove every persisted secret.
pub async fn clear_session(store: &dyn CredentialStore) -> Result<(), SessionError> {
    for key in SecretKey::iter() {
        store.delete(key).await?;
    }
    Ok(())
}

pub(crate) async fn record_refresh_time(store: &dyn CredentialStore, at: DateTime<Utc>) {
    if let Err(err) = store
        .set(SecretKey::LastRefreshAt, &at.timestamp_millis().to_string())
        .await
    {
        tracing::warn!(error = %err, "Failed to record refresh time");
    }
}

pub(crate) async fn last_refresh_time(store: &dyn CredentialStore) -> Option<DateTime<Utc>> {
    read_or_absent(store, SecretKey::LastRefreshAt)
        .await
        .and_then(|raw| parse_epoch_ms(&raw))
}

fn parse_epoch_ms(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// File-backed store: one versioned TOML file, rewritten atomically.
///
/// # Example
/// ```no_run
/// use hearth::auth::{CredentialStore, FileCredentialStore, SecretKey};
///
/// # async fn example() -> Result<(), hearth::auth::SessionError> {
/// let store = FileCredentialStore::new_default();
/// store.set(SecretKey::SelectedFamily, "family-42").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: base_dir.into().join(CREDENTIAL_FILE_NAME),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_hearth_dir())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<CredentialFile, SessionError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialFile::empty())
            }
            Err(err) => return Err(err.into()),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        if file.version != CREDENTIAL_FILE_VERSION {
            return Err(SessionError::StorageUnavailable(format!(
                "Unsupported credential file version {} at {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(file)
    }

    async fn write_file(&self, file: &CredentialFile) -> Result<(), SessionError> {
        let serialized = toml::to_string(file)?;
        atomic_write(&self.path, serialized.as_bytes()).await
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: SecretKey) -> Result<Option<String>, SessionError> {
        let _guard = self.lock.lock().await;
        let file = self.read_file().await?;
        Ok(file.secrets.get(key.as_ref()).cloned())
    }

    async fn set(&self, key: SecretKey, value: &str) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file().await?;
        file.secrets.insert(key.to_string(), value.to_string());
        self.write_file(&file).await
    }

    async fn delete(&self, key: SecretKey) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file().await?;
        if file.secrets.remove(key.as_ref()).is_none() {
            return Ok(());
        }
        self.write_file(&file).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

impl CredentialFile {
    fn empty() -> Self {
        Self {
            version: CREDENTIAL_FILE_VERSION,
            secrets: BTreeMap::new(),
        }
    }
}

pub(crate) fn default_hearth_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".hearth"))
        .unwrap_or_else(|| PathBuf::from(".hearth"))
}

async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        SessionError::StorageUnavailable(format!(
            "Credential path {} has no file name",
            path.display()
        ))
    })?;
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_path = path.with_file_name(format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    if let Err(err) = tokio::fs::write(&temp_path, data).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }
    Ok(())
}

/// In-process store for tests and ephemeral sessions.
///
/// Can be switched into an "unavailable" mode where every call fails, to
/// exercise the storage-failure paths.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<SecretKey, String>>,
    unavailable: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again with `None`).
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }

    /// Snapshot of the stored value, bypassing the availability switch.
    pub fn peek(&self, key: SecretKey) -> Option<String> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn check_available(&self) -> Result<(), SessionError> {
        match self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(reason) => Err(SessionError::StorageUnavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: SecretKey) -> Result<Option<String>, SessionError> {
        self.check_available()?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: SecretKey, value: &str) -> Result<(), SessionError> {
        self.check_available()?;
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value.to_string());
        Ok(())
    }

    async fn delete(&self, key: SecretKey) -> Result<(), SessionError> {
        self.check_available()?;
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok(())
    }
}
