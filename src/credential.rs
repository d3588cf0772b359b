//! Bearer credential storage.
//!
//! The [`CredentialStore`] keeps the provider access token in memory and in
//! durable [`Storage`], so that a restart picks up where the previous
//! session left off. Durable storage is shared with every other session
//! that uses the same backing store; there is no locking and the last
//! writer wins.
//!
//! Storage failures never escape the store: they are logged and the store
//! behaves as if no credential were present.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use veil::Redact;

/// An opaque bearer token.
///
/// The value is never validated and never appears in `Debug` output.
#[derive(Clone, Redact, PartialEq, Eq, Hash)]
pub struct Credential(#[redact] String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Durable key-value storage that survives restarts.
pub trait Storage: Send + Sync {
    /// Returns the value under `key`, or `None` if absent.
    fn read(&self, key: &str) -> io::Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> io::Result<()>;
    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Storage backed by one file per key inside a directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Values are small; larger files are treated as corrupt.
    const MAX_VALUE_SIZE: u64 = 16 * 1024;

    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let path = self.path(key);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.len() > Self::MAX_VALUE_SIZE => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is too large", path.display()),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let value = fs::read_to_string(&path)?;
        let value = value.trim();
        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(value.to_owned()))
        }
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

/// Storage kept in process memory.
///
/// Clones share the same map, which makes it possible to hand one backing
/// store to several bridges the way browser tabs share an origin.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Memory-cached credential backed by durable storage.
pub struct CredentialStore {
    storage: Box<dyn Storage>,
    cached: Mutex<Option<Credential>>,
}

impl CredentialStore {
    /// The single key holding the raw credential.
    pub const KEY: &'static str = "access_token";

    pub fn new<S>(storage: S) -> Self
    where
        S: Storage + 'static,
    {
        Self {
            storage: Box::new(storage),
            cached: Mutex::new(None),
        }
    }

    /// Stores `credential` in memory and durable storage.
    ///
    /// A failing durable write is logged; the credential then lasts only as
    /// long as this store.
    pub fn set(&self, credential: Credential) {
        if let Err(e) = self.storage.write(Self::KEY, credential.as_str()) {
            warn!("could not persist credential: {e}");
        }
        *self.cache() = Some(credential);
    }

    /// Returns the credential, reading durable storage on a cache miss.
    #[must_use]
    pub fn get(&self) -> Option<Credential> {
        let mut cached = self.cache();
        if cached.is_none() {
            match self.storage.read(Self::KEY) {
                Ok(value) => *cached = value.map(Credential::new),
                Err(e) => warn!("could not read credential: {e}"),
            }
        }

        cached.clone()
    }

    /// Removes the credential from memory and durable storage.
    pub fn clear(&self) {
        *self.cache() = None;
        if let Err(e) = self.storage.remove(Self::KEY) {
            warn!("could not remove credential: {e}");
        }
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, Option<Credential>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("cached", &*self.cache())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_cache() {
        let store = CredentialStore::new(MemoryStorage::new());
        store.set(Credential::new("abc123"));
        assert_eq!(store.get(), Some(Credential::new("abc123")));
    }

    #[test]
    fn round_trip_through_fresh_cache() {
        let storage = MemoryStorage::new();
        CredentialStore::new(storage.clone()).set("abc123".into());

        let fresh = CredentialStore::new(storage);
        assert_eq!(fresh.get().as_ref().map(Credential::as_str), Some("abc123"));
    }

    #[test]
    fn clear_removes_everywhere() {
        let storage = MemoryStorage::new();
        let store = CredentialStore::new(storage.clone());
        store.set("abc123".into());
        store.clear();

        assert_eq!(store.get(), None);
        assert_eq!(storage.read(CredentialStore::KEY).unwrap(), None);
    }

    #[test]
    fn last_writer_wins() {
        let storage = MemoryStorage::new();
        let first = CredentialStore::new(storage.clone());
        let second = CredentialStore::new(storage.clone());

        first.set("one".into());
        second.set("two".into());

        // The first store still serves its cached value.
        assert_eq!(first.get(), Some(Credential::new("one")));
        assert_eq!(CredentialStore::new(storage).get(), Some(Credential::new("two")));
    }

    #[test]
    fn file_storage_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        CredentialStore::new(FileStorage::new(dir.path().join("state"))).set("abc123".into());

        let restarted = CredentialStore::new(FileStorage::new(dir.path().join("state")));
        assert_eq!(restarted.get(), Some(Credential::new("abc123")));

        restarted.clear();
        assert!(!dir.path().join("state").join(CredentialStore::KEY).exists());
        assert_eq!(restarted.get(), None);
    }

    #[test]
    fn missing_file_means_absent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert_eq!(storage.read("nothing").unwrap(), None);
        storage.remove("nothing").unwrap();
    }

    #[test]
    fn debug_output_is_redacted() {
        let credential = Credential::new("supersecret");
        assert!(!format!("{credential:?}").contains("supersecret"));
    }
}
