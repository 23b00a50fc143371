//! Object store backends.

use crate::cloud::ObjectStore;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Object store laid out as a directory: one file per object key.
///
/// ```text
/// <root>/<region>/<bucket>/1000042.ldb
/// <root>/<region>/<bucket>/bloom1000042.ldb
/// ```
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens the bucket directory `<root>/<region>/<bucket>`.
    pub fn for_bucket<P: AsRef<Path>>(root: P, region: &str, bucket: &str) -> Result<Self> {
        Self::open(root.as_ref().join(region).join(bucket))
    }

    /// Directory holding the objects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::invalid_argument(format!("invalid object key {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        // Readers never observe a partially written object.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        std::io::Write::write_all(&mut tmp, data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.object_path(key)?.is_file())
    }
}

/// In-memory object store, shareable between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects.read().get(key).cloned().ok_or_else(|| Error::not_found(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn ObjectStore) {
        assert!(!store.exists("1000000.ldb").unwrap());
        assert!(matches!(store.get("1000000.ldb"), Err(Error::NotFound(_))));

        store.put("1000000.ldb", b"first").unwrap();
        store.put("1000000.ldb", b"second").unwrap();
        assert_eq!(store.get("1000000.ldb").unwrap(), b"second");
        assert!(store.exists("1000000.ldb").unwrap());

        store.delete("1000000.ldb").unwrap();
        store.delete("1000000.ldb").unwrap();
        assert!(!store.exists("1000000.ldb").unwrap());
    }

    #[test]
    fn test_local_store() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::for_bucket(dir.path(), "us-east-1", "bucket").unwrap();
        assert!(store.root().ends_with("us-east-1/bucket"));
        exercise(&store);
    }

    #[test]
    fn test_local_store_rejects_paths() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::open(dir.path()).unwrap();
        assert!(matches!(store.put("../escape.ldb", b"x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(store.get(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryObjectStore::new();
        exercise(&store);

        let shared = store.clone();
        shared.put("000004.ldb", b"x").unwrap();
        assert_eq!(store.keys(), vec!["000004.ldb".to_string()]);
    }

    #[test]
    fn test_file_helpers() {
        let dir = TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        let src = dir.path().join("src.ldb");
        fs::write(&src, b"payload").unwrap();

        store.put_file("000007.ldb", &src).unwrap();
        let dest = dir.path().join("out").join("000007.ldb");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        store.get_to_file("000007.ldb", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }
}
