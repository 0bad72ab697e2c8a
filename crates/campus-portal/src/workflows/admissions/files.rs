use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::domain::StorageLocator;

const LOCATOR_PREFIX: &str = "uploads/";

/// Outcome of removing stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRemoval {
    Removed,
    NotFound,
}

/// Blob storage for uploaded documents. Locators are opaque to the workflow engine.
pub trait FileStore: Send + Sync {
    fn store(&self, bytes: &[u8], declared_name: &str) -> Result<StorageLocator, FileStoreError>;
    fn delete(&self, locator: &StorageLocator) -> Result<FileRemoval, FileStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file store io error: {0}")]
    Io(#[from] io::Error),
    #[error("locator '{0}' does not point inside the upload area")]
    InvalidLocator(String),
    #[error("declared file name '{0}' has no usable characters")]
    InvalidName(String),
}

/// Reduces a client supplied name to ASCII letters, digits, `.`, `-` and `_`.
pub fn secure_file_name(declared: &str) -> String {
    let base = declared
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .filter_map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => Some(ch),
            ch if ch.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();

    cleaned.trim_start_matches(['.', '_']).to_string()
}

/// Writes uploads beneath a root directory, handing out `uploads/<name>` locators.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, locator: &StorageLocator) -> Result<PathBuf, FileStoreError> {
        let name = locator
            .0
            .strip_prefix(LOCATOR_PREFIX)
            .filter(|name| !name.is_empty() && secure_file_name(name) == *name)
            .ok_or_else(|| FileStoreError::InvalidLocator(locator.0.clone()))?;
        Ok(self.root.join(name))
    }
}

impl FileStore for DiskFileStore {
    fn store(&self, bytes: &[u8], declared_name: &str) -> Result<StorageLocator, FileStoreError> {
        let name = secure_file_name(declared_name);
        if name.is_empty() {
            return Err(FileStoreError::InvalidName(declared_name.to_string()));
        }

        let mut candidate = name.clone();
        let mut attempt = 1;
        let mut file = loop {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.root.join(&candidate));
            match created {
                Ok(file) => break file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    candidate = format!("{attempt}_{name}");
                }
                Err(err) => return Err(err.into()),
            }
        };

        file.write_all(bytes)?;
        Ok(StorageLocator(format!("{LOCATOR_PREFIX}{candidate}")))
    }

    fn delete(&self, locator: &StorageLocator) -> Result<FileRemoval, FileStoreError> {
        let path = self.resolve(locator)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(FileRemoval::Removed),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(FileRemoval::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}

/// Map-backed store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFileStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryFileStore {
    pub fn contains(&self, locator: &StorageLocator) -> bool {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&locator.0)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops bytes behind the engine's back, as an operator cleaning the disk would.
    pub fn evict(&self, locator: &StorageLocator) {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&locator.0);
    }
}

impl FileStore for InMemoryFileStore {
    fn store(&self, bytes: &[u8], declared_name: &str) -> Result<StorageLocator, FileStoreError> {
        let name = secure_file_name(declared_name);
        if name.is_empty() {
            return Err(FileStoreError::InvalidName(declared_name.to_string()));
        }

        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut locator = format!("{LOCATOR_PREFIX}{name}");
        let mut attempt = 1;
        while blobs.contains_key(&locator) {
            attempt += 1;
            locator = format!("{LOCATOR_PREFIX}{attempt}_{name}");
        }
        blobs.insert(locator.clone(), bytes.to_vec());
        Ok(StorageLocator(locator))
    }

    fn delete(&self, locator: &StorageLocator) -> Result<FileRemoval, FileStoreError> {
        let removed = self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&locator.0);
        Ok(match removed {
            Some(_) => FileRemoval::Removed,
            None => FileRemoval::NotFound,
        })
    }
}
