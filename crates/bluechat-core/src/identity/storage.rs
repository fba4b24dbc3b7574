//! Storage abstraction for identity data
//!
//! A small key-value interface that the identity store persists into. The
//! in-memory implementation backs tests; the file implementation keeps a TOML
//! table on disk, one key per persisted value.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{BluechatError, Result};

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Key-value storage for identity data
pub trait IdentityStorage: Send + Sync {
    /// Store a value under `key`, replacing any previous value
    fn store(&mut self, key: &str, value: &str) -> Result<()>;

    /// Retrieve the value stored under `key`
    fn retrieve(&self, key: &str) -> Result<Option<String>>;

    /// Delete the value under `key`
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Check if storage is available and accessible
    fn is_available(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

/// In-memory storage implementation for testing and fallback
#[derive(Debug)]
pub struct MemoryStorage {
    data: BTreeMap<String, String>,
    available: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            available: true,
        }
    }

    /// Storage that fails every operation, for exercising fallback paths
    pub fn unavailable() -> Self {
        Self {
            data: BTreeMap::new(),
            available: false,
        }
    }
}

impl IdentityStorage for MemoryStorage {
    fn store(&mut self, key: &str, value: &str) -> Result<()> {
        if !self.available {
            return Err(BluechatError::storage_error("Storage not available"));
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        if !self.available {
            return Err(BluechatError::storage_error("Storage not available"));
        }
        Ok(self.data.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        if !self.available {
            return Err(BluechatError::storage_error("Storage not available"));
        }
        self.data.remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ----------------------------------------------------------------------------
// File Storage Implementation
// ----------------------------------------------------------------------------

/// TOML-file backed storage (e.g. `~/.bluechat/identity.toml`)
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                BluechatError::storage_error(format!(
                    "Failed to parse {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BluechatError::storage_error(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BluechatError::storage_error(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let contents = toml::to_string(data)
            .map_err(|e| BluechatError::storage_error(format!("Failed to serialize: {}", e)))?;
        fs::write(&self.path, contents).map_err(|e| {
            BluechatError::storage_error(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl IdentityStorage for FileStorage {
    fn store(&mut self, key: &str, value: &str) -> Result<()> {
        // An unreadable file is replaced rather than blocking the write
        let mut data = self.load().unwrap_or_default();
        data.insert(key.to_string(), value.to_string());
        self.save(&data)
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let mut data = self.load()?;
        if data.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        assert!(storage.is_available());

        storage.store("unique_uuid", "1a2b3c4d").unwrap();
        assert_eq!(
            storage.retrieve("unique_uuid").unwrap().as_deref(),
            Some("1a2b3c4d")
        );

        storage.delete("unique_uuid").unwrap();
        assert!(storage.retrieve("unique_uuid").unwrap().is_none());
    }

    #[test]
    fn test_unavailable_storage_errors() {
        let mut storage = MemoryStorage::unavailable();
        assert!(storage.store("k", "v").is_err());
        assert!(storage.retrieve("k").is_err());
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.toml");

        let mut storage = FileStorage::new(&path);
        assert!(storage.retrieve("unique_uuid").unwrap().is_none());
        storage.store("unique_uuid", "0badcafe").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.retrieve("unique_uuid").unwrap().as_deref(),
            Some("0badcafe")
        );
    }

    #[test]
    fn test_file_storage_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let storage = FileStorage::new(&path);
        assert!(storage.retrieve("unique_uuid").is_err());
    }
}
