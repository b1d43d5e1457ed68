use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::auth::token::{token_preview, Identity, TokenPair};
use crate::error::{ClientError, ClientResult};

/// Key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Key holding the cached identity as JSON
pub const USER_KEY: &str = "user";

/// Durable string key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// Write several values in one step
    fn set_many(&self, entries: &[(&str, &str)]) -> ClientResult<()>;

    /// Remove several keys in one step; missing keys are ignored
    fn delete_many(&self, keys: &[&str]) -> ClientResult<()>;

    /// Write a single value
    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.set_many(&[(key, value)])
    }

    /// Remove a single key
    fn delete(&self, key: &str) -> ClientResult<()> {
        self.delete_many(&[key])
    }
}

/// In-memory store, used in tests and for ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_many(&self, new_entries: &[(&str, &str)]) -> ClientResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in new_entries {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> ClientResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// JSON file store.
///
/// The whole map is kept in memory and rewritten to disk on every change,
/// through a temporary file and a rename so a crash never leaves half a file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    ClientError::Storage(format!(
                        "corrupt session store at {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
        } else {
            debug!(path = %path.display(), "No session store on disk yet");
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let serialized = serde_json::to_string_pretty(entries)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        write_private(&tmp_path, serialized.as_bytes())?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_many(&self, new_entries: &[(&str, &str)]) -> ClientResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = entries.clone();
        for (key, value) in new_entries {
            updated.insert(key.to_string(), value.to_string());
        }
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> ClientResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !keys.iter().any(|k| entries.contains_key(*k)) {
            return Ok(());
        }
        let mut updated = entries.clone();
        for key in keys {
            updated.remove(*key);
        }
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Persists the session's token pair.
///
/// Every write and every clear bumps a generation counter. A writer that read
/// the store before someone else changed it (a refresh racing a logout or a
/// new login) uses the `*_if_generation` variants and loses.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    generation: Mutex<u64>,
}

impl TokenStore {
    /// Create a token store over a key-value backend
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            generation: Mutex::new(0),
        }
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a token pair
    pub fn save(&self, pair: &TokenPair) -> ClientResult<()> {
        pair.validate()?;
        let mut guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_pair(pair)?;
        *guard += 1;
        Ok(())
    }

    /// Store a token pair unless the store changed after `generation`.
    ///
    /// Returns whether the pair was written.
    pub fn save_if_generation(&self, pair: &TokenPair, generation: u64) -> ClientResult<bool> {
        pair.validate()?;
        let mut guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != generation {
            debug!(
                expected = generation,
                current = *guard,
                "Token store changed since refresh started, discarding new pair"
            );
            return Ok(false);
        }
        self.write_pair(pair)?;
        *guard += 1;
        Ok(true)
    }

    /// Load the stored pair. A half-written pair counts as absent.
    pub fn load(&self) -> ClientResult<Option<TokenPair>> {
        let access = self.backend.get(ACCESS_TOKEN_KEY)?.filter(|t| !t.is_empty());
        let refresh = self.backend.get(REFRESH_TOKEN_KEY)?.filter(|t| !t.is_empty());

        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok(Some(TokenPair::new(access, refresh))),
            (None, None) => Ok(None),
            _ => {
                warn!("Found an incomplete token pair in storage, ignoring it");
                Ok(None)
            }
        }
    }

    /// Stored access token, if a complete pair exists
    pub fn access_token(&self) -> ClientResult<Option<String>> {
        Ok(self.load()?.map(|pair| pair.access_token))
    }

    /// Stored refresh token, if a complete pair exists
    pub fn refresh_token(&self) -> ClientResult<Option<String>> {
        Ok(self.load()?.map(|pair| pair.refresh_token))
    }

    /// Remove both tokens. Idempotent.
    pub fn clear(&self) -> ClientResult<()> {
        let mut guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += 1;
        self.backend.delete_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])?;
        debug!(generation = *guard, "Token store cleared");
        Ok(())
    }

    /// Remove both tokens unless the store changed after `generation`
    pub fn clear_if_generation(&self, generation: u64) -> ClientResult<bool> {
        let mut guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != generation {
            return Ok(false);
        }
        *guard += 1;
        self.backend.delete_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])?;
        Ok(true)
    }

    fn write_pair(&self, pair: &TokenPair) -> ClientResult<()> {
        self.backend.set_many(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
        ])?;
        info!(
            access = %token_preview(&pair.access_token),
            "Token pair stored"
        );
        Ok(())
    }
}

/// Caches the logged-in identity next to the tokens
pub struct IdentityCache {
    backend: Arc<dyn KeyValueStore>,
}

impl IdentityCache {
    /// Create an identity cache over a key-value backend
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Store the identity
    pub fn save(&self, identity: &Identity) -> ClientResult<()> {
        let json = serde_json::to_string(identity)?;
        self.backend.set(USER_KEY, &json)
    }

    /// Load the identity; a corrupt entry is a `Decode` error
    pub fn load(&self) -> ClientResult<Option<Identity>> {
        match self.backend.get(USER_KEY)? {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    /// Remove the identity. Idempotent.
    pub fn clear(&self) -> ClientResult<()> {
        self.backend.delete(USER_KEY)
    }
}
