//! Scratch storage for produced artifacts
//!
//! Each unit owns a private namespace (batch id + unit id). Artifacts wait
//! there between a successful run and commit. The backing medium is
//! swappable through `ScratchStore`.
//!
//! Methods are synchronous: they are called from blocking worker threads and
//! from `spawn_blocking` commit tasks.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

/// Namespace of one unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    pub batch_id: Uuid,
    pub unit_id: String,
}

impl ScratchKey {
    pub fn new(batch_id: Uuid, unit_id: impl Into<String>) -> Self {
        Self {
            batch_id,
            unit_id: unit_id.into(),
        }
    }
}

/// Artifact storage keyed by unit
pub trait ScratchStore: Send + Sync {
    /// Store an artifact, replacing any previous one with the same name
    fn put(&self, key: &ScratchKey, name: &str, bytes: Vec<u8>) -> io::Result<()>;

    /// Read an artifact (`NotFound` if absent)
    fn get(&self, key: &ScratchKey, name: &str) -> io::Result<Vec<u8>>;

    /// Artifact names in the namespace, sorted
    fn list(&self, key: &ScratchKey) -> io::Result<Vec<String>>;

    /// Remove one artifact; absent artifacts are fine
    fn delete(&self, key: &ScratchKey, name: &str) -> io::Result<()>;

    /// Remove the whole namespace; idempotent
    fn purge(&self, key: &ScratchKey) -> io::Result<()>;
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "scratch lock poisoned")
}

/// In-process scratch store (default)
#[derive(Default)]
pub struct MemoryScratch {
    entries: RwLock<HashMap<ScratchKey, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of namespaces currently holding artifacts
    pub fn namespace_count(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }
}

impl ScratchStore for MemoryScratch {
    fn put(&self, key: &ScratchKey, name: &str, bytes: Vec<u8>) -> io::Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries
            .entry(key.clone())
            .or_default()
            .insert(name.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &ScratchKey, name: &str) -> io::Result<Vec<u8>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .get(key)
            .and_then(|artifacts| artifacts.get(name))
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("artifact '{}' not in scratch for unit {}", name, key.unit_id),
                )
            })
    }

    fn list(&self, key: &ScratchKey) -> io::Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .get(key)
            .map(|artifacts| artifacts.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn delete(&self, key: &ScratchKey, name: &str) -> io::Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if let Some(artifacts) = entries.get_mut(key) {
            artifacts.remove(name);
            if artifacts.is_empty() {
                entries.remove(key);
            }
        }
        Ok(())
    }

    fn purge(&self, key: &ScratchKey) -> io::Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

/// Scratch store under a directory: `<root>/<batch>/<unit>/<artifact>`
pub struct DiskScratch {
    root: PathBuf,
}

impl DiskScratch {
    /// Create the store, creating `root` if needed
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unit_dir(&self, key: &ScratchKey) -> PathBuf {
        self.root
            .join(key.batch_id.to_string())
            .join(&key.unit_id)
    }

    fn artifact_path(&self, key: &ScratchKey, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid artifact name '{}'", name),
            ));
        }
        Ok(self.unit_dir(key).join(name))
    }
}

impl ScratchStore for DiskScratch {
    fn put(&self, key: &ScratchKey, name: &str, bytes: Vec<u8>) -> io::Result<()> {
        let path = self.artifact_path(key, name)?;
        fs::create_dir_all(self.unit_dir(key))?;
        fs::write(path, bytes)
    }

    fn get(&self, key: &ScratchKey, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.artifact_path(key, name)?)
    }

    fn list(&self, key: &ScratchKey) -> io::Result<Vec<String>> {
        let dir = self.unit_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, key: &ScratchKey, name: &str) -> io::Result<()> {
        match fs::remove_file(self.artifact_path(key, name)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn purge(&self, key: &ScratchKey) -> io::Result<()> {
        match fs::remove_dir_all(self.unit_dir(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => {
                // Drop the batch directory once its last unit is gone
                let batch_dir = self.root.join(key.batch_id.to_string());
                let _ = fs::remove_dir(batch_dir);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn ScratchStore) {
        let key = ScratchKey::new(Uuid::new_v4(), "u1");
        let other = ScratchKey::new(key.batch_id, "u2");

        store.put(&key, "02.ust", b"two".to_vec()).unwrap();
        store.put(&key, "01.ust", b"one".to_vec()).unwrap();
        store.put(&other, "01.ust", b"other".to_vec()).unwrap();

        assert_eq!(store.list(&key).unwrap(), vec!["01.ust", "02.ust"]);
        assert_eq!(store.get(&key, "01.ust").unwrap(), b"one");
        // Namespaces are isolated per unit
        assert_eq!(store.get(&other, "01.ust").unwrap(), b"other");

        store.delete(&key, "01.ust").unwrap();
        store.delete(&key, "01.ust").unwrap();
        assert_eq!(
            store.get(&key, "01.ust").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );

        store.purge(&key).unwrap();
        store.purge(&key).unwrap();
        assert!(store.list(&key).unwrap().is_empty());
        assert_eq!(store.list(&other).unwrap(), vec!["01.ust"]);
    }

    #[test]
    fn test_memory_scratch() {
        let store = MemoryScratch::new();
        exercise(&store);
        assert_eq!(store.namespace_count(), 1);
    }

    #[test]
    fn test_disk_scratch() {
        let dir = TempDir::new().unwrap();
        let store = DiskScratch::new(dir.path().join("scratch")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_disk_scratch_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = DiskScratch::new(dir.path()).unwrap();
        let key = ScratchKey::new(Uuid::new_v4(), "u1");
        let err = store.put(&key, "../escape", b"x".to_vec()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
