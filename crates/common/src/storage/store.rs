use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::crypto::{AtRestCipher, IvPolicy, StorageCipherError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
    #[error("failed to persist store: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error(transparent)]
    Cipher(#[from] StorageCipherError),
    #[error("value for {key} is not valid json")]
    InvalidJson { key: String },
}

type Entries = BTreeMap<String, String>;

/// Encrypted key/value store backed by a single JSON file
///
/// Both keys and values are encrypted with the at-rest cipher. Keys always
/// use the zero IV so the same key encrypts to the same entry name; values
/// use the store's IV policy.
///
/// Every operation reads the file and every mutation rewrites it through a
/// temp file in the same directory, so a crash never leaves a half-written
/// store. Concurrent writers in separate processes are not coordinated.
#[derive(Debug)]
pub struct SecureStore {
    path: PathBuf,
    cipher: AtRestCipher,
    value_policy: IvPolicy,
}

impl SecureStore {
    /// Open (or lazily create) the store at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if `key` is not a valid at-rest key.
    pub fn open(
        path: impl Into<PathBuf>,
        key: &str,
        value_policy: IvPolicy,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            path: path.into(),
            cipher: AtRestCipher::new(key)?,
            value_policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.multi_set([(key, value)])
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.load()?;
        self.lookup(&entries, key)
    }

    /// Deep-merge `value` into the stored JSON at `key`
    ///
    /// Objects merge recursively; anything else replaces what was stored. A
    /// missing or non-JSON stored value is treated as absent.
    pub fn merge_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.multi_merge([(key, value)])
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.multi_remove([key])
    }

    /// Every key whose entry name decrypts, sorted
    pub fn get_all_keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.load()?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter_map(|encrypted| match self.cipher.decrypt(encrypted) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping store entry that does not decrypt");
                    None
                }
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn multi_get<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<(String, Option<String>)>, StoreError> {
        let entries = self.load()?;
        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.lookup(&entries, key)?)))
            .collect()
    }

    pub fn multi_set<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        for (key, value) in pairs {
            entries.insert(self.entry_name(key)?, self.seal(value)?);
        }
        self.save(&entries)
    }

    pub fn multi_merge<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        for (key, value) in pairs {
            let patch: Value = serde_json::from_str(value).map_err(|_| StoreError::InvalidJson {
                key: key.to_string(),
            })?;

            let merged = match self
                .lookup(&entries, key)?
                .and_then(|stored| serde_json::from_str::<Value>(&stored).ok())
            {
                Some(mut stored) => {
                    merge_json(&mut stored, patch);
                    stored
                }
                None => patch,
            };

            entries.insert(self.entry_name(key)?, self.seal(&merged.to_string())?);
        }
        self.save(&entries)
    }

    pub fn multi_remove<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        for key in keys {
            entries.remove(&self.entry_name(key)?);
        }
        self.save(&entries)
    }

    /// Drop every entry
    pub fn clear(&self) -> Result<(), StoreError> {
        self.save(&Entries::new())
    }

    fn entry_name(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.cipher.encrypt(key, IvPolicy::Zero)?)
    }

    fn seal(&self, value: &str) -> Result<String, StoreError> {
        Ok(self.cipher.encrypt(value, self.value_policy)?)
    }

    fn lookup(&self, entries: &Entries, key: &str) -> Result<Option<String>, StoreError> {
        match entries.get(&self.entry_name(key)?) {
            Some(sealed) => Ok(Some(self.cipher.decrypt(sealed)?)),
            None => Ok(None),
        }
    }

    fn load(&self) -> Result<Entries, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Corrupt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &Entries) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, entries).map_err(std::io::Error::from)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "saved secure store");
        Ok(())
    }
}

/// Recursively merge `patch` into `target`
fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn store(dir: &tempfile::TempDir) -> SecureStore {
        SecureStore::open(dir.path().join("store.json"), KEY, IvPolicy::Random).unwrap()
    }

    #[test]
    fn test_merge_json() {
        let mut target = json!({ "a": 1, "nested": { "x": 1, "y": 2 }, "list": [1] });
        merge_json(
            &mut target,
            json!({ "b": 2, "nested": { "y": 3, "z": 4 }, "list": [2] }),
        );

        assert_eq!(
            target,
            json!({ "a": 1, "b": 2, "nested": { "x": 1, "y": 3, "z": 4 }, "list": [2] })
        );

        let mut scalar = json!("text");
        merge_json(&mut scalar, json!({ "a": 1 }));
        assert_eq!(scalar, json!({ "a": 1 }));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert_eq!(store.get_item("anything").unwrap(), None);
        assert!(store.get_all_keys().unwrap().is_empty());
    }

    #[test]
    fn test_entries_are_encrypted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.set_item("session-token", "very secret").unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("session-token"));
        assert!(!raw.contains("very secret"));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "not json").unwrap();

        assert!(matches!(store.get_item("k"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_merge_requires_json_patch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store.merge_item("k", "not json"),
            Err(StoreError::InvalidJson { .. })
        ));
    }
}
