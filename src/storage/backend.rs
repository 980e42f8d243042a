use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// String-keyed textual storage. Implementations are shared behind an `Arc`,
/// so everything takes `&self`.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Vec<String>;
}

/// One file per key under a directory, `{key}.json`.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    path.file_stem()?.to_str().map(|stem| stem.to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Ephemeral backend. Backs tests and runs that should leave no files behind.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_backend_round_trips_values() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        assert!(backend.get("absent").is_none());
        backend.set("first", "{\"v\":1}").unwrap();
        backend.set("second", "hello").unwrap();

        assert_eq!(backend.get("first").as_deref(), Some("{\"v\":1}"));

        let mut keys = backend.keys();
        keys.sort();
        assert_eq!(keys, vec!["first", "second"]);

        backend.remove("first").unwrap();
        assert!(backend.get("first").is_none());
        backend.remove("first").unwrap();
    }

    #[test]
    fn memory_backend_round_trips_values() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").unwrap();
        assert_eq!(backend.get("k").as_deref(), Some("v"));
        assert_eq!(backend.keys(), vec!["k"]);
        backend.remove("k").unwrap();
        assert!(backend.get("k").is_none());
    }
}
