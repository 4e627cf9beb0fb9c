//! File-backed and in-memory [`StoragePort`] adapters.
//!
//! `FileStore` maps a namespace to a directory and a key to
//! `<namespace>/<key>.json`.  Writes land in a dot-prefixed temp file
//! next to the target, are flushed with `sync_all`, then renamed over the
//! target, so a crash mid-write leaves the previous version intact.
//!
//! `MemoryStore` keeps everything in a `HashMap` for tests and simulation.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::app::ports::{StorageError, StoragePort};

// ───────────────────────────────────────────────────────────────
// FileStore
// ───────────────────────────────────────────────────────────────

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(sanitize(namespace))
            .join(format!("{}.json", sanitize(key)))
    }
}

/// Keep keys to a portable file-name alphabet.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn io_err(e: &std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::Io(e.kind())
    }
}

fn write_file_sync(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(data)?;
    f.sync_all()
}

impl StoragePort for FileStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path_for(namespace, key)).map_err(|e| io_err(&e))
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let target = self.path_for(namespace, key);
        let dir = self.root.join(sanitize(namespace));
        fs::create_dir_all(&dir).map_err(|e| StorageError::Io(e.kind()))?;

        let tmp = dir.join(format!(".{}.json.tmp", sanitize(key)));
        write_file_sync(&tmp, data).map_err(|e| StorageError::Io(e.kind()))?;
        fs::rename(&tmp, &target).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::Io(e.kind())
        })?;
        debug!("STORE | wrote {} ({} bytes)", target.display(), data.len());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.kind())),
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.path_for(namespace, key).is_file()
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join(sanitize(namespace));
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e.kind())),
        };
        let mut keys: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .filter_map(|name| name.strip_suffix(".json").map(str::to_owned))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ───────────────────────────────────────────────────────────────
// MemoryStore
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<(String, String), Vec<u8>>) -> R) -> R {
        let mut guard = match self.data.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl StoragePort for MemoryStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.with(|m| {
            m.get(&(namespace.to_owned(), key.to_owned()))
                .cloned()
                .ok_or(StorageError::NotFound)
        })
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.with(|m| {
            m.insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        });
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.with(|m| {
            m.remove(&(namespace.to_owned(), key.to_owned()));
        });
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.with(|m| m.contains_key(&(namespace.to_owned(), key.to_owned())))
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.with(|m| {
            m.keys()
                .filter(|(ns, _)| ns == namespace)
                .map(|(_, k)| k.clone())
                .collect()
        });
        keys.sort();
        Ok(keys)
    }
}
