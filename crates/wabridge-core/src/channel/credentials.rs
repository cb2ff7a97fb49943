//! Credential persistence for the transport session.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::Credentials;

/// Storage for the session's credential set.
pub trait CredentialStore: Send + Sync {
    /// Load the persisted credentials; empty when nothing was saved yet.
    fn load(&self) -> Result<Credentials>;

    /// Replace the persisted credentials.
    fn save(&self, credentials: &Credentials) -> Result<()>;
}

/// Credentials kept as a JSON file on disk.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credentials> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No persisted credentials");
            return Ok(Credentials::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credentials {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Credentials::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt credentials file {}", self.path.display()))
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Atomic replace through a sibling temp file
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(credentials)?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Persisted credentials");
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Credentials>,
    saves: Mutex<usize>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(credentials),
            saves: Mutex::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credentials> {
        Ok(self.credentials.lock().clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.credentials.lock() = credentials.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth").join("creds.json"));
        let creds = Credentials::new(json!({ "me": { "id": "15550001111:7@s.whatsapp.net" } }));

        store.save(&creds).unwrap();

        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
        assert_eq!(store.load().unwrap(), creds);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileCredentialStore::new(path);
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("Corrupt credentials file"));
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemoryCredentialStore::default();
        store
            .save(&Credentials::new(json!({ "registered": true })))
            .unwrap();
        assert_eq!(store.save_count(), 1);
        assert!(!store.load().unwrap().is_empty());
    }
}
