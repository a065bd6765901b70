//! The server's file store.
//!
//! A store is one flat directory. Files are addressed by bare name; names
//! that would reach outside the directory are refused. Every name has a
//! read/write lock so that a check and the action after it (open then
//! stream, create then fill, remove) are atomic with respect to other
//! connections. Locks are never held while waiting on a person:
//!
//! - downloads hold the read lock while they stream
//! - uploads hold the write lock while the body arrives, bounded by a stall
//!   timeout
//! - deletes hold the write lock only for the removal itself

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::fs::{self, File};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{Error, Result};

/// Check that a name addresses a file directly inside the store.
///
/// Rejects empty names, `.` and `..`, path separators and NUL bytes.
///
/// # Errors
///
/// Returns `InvalidName` describing the first problem found.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName(String::new()));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidName(name.to_string()));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidName(name.escape_default().to_string()));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct NameLocks {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl NameLocks {
    fn get(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Drop entries nobody holds any more.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

/// A directory of files served to clients.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    locks: Arc<NameLocks>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or is not a
    /// directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;
        let root = fs::canonicalize(root).await?;
        if !fs::metadata(&root).await?.is_dir() {
            return Err(Error::InvalidInput(format!(
                "store root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            locks: Arc::default(),
        })
    }

    /// The canonical store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file in the store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if `name` is not a bare file name.
    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Take the shared lock for `name`.
    pub async fn read_lock(&self, name: &str) -> OwnedRwLockReadGuard<()> {
        self.locks.get(name).read_owned().await
    }

    /// Take the exclusive lock for `name`.
    pub async fn write_lock(&self, name: &str) -> OwnedRwLockWriteGuard<()> {
        self.locks.get(name).write_owned().await
    }

    /// Names of the regular files in the store, in directory order.
    ///
    /// Dot-prefixed names and names that are not valid UTF-8 are left out.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!("Skipping non UTF-8 name: {:?}", entry.file_name());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            // Follows symlinks, so a link to a regular file is listed.
            match fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_file() => names.push(name),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping {}: {}", name, e),
            }
        }

        Ok(names)
    }

    /// Whether `name` is a regular file in the store.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_of(name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open `name` for reading together with its size.
    ///
    /// Returns `Ok(None)` if there is no regular file by that name. The size
    /// comes from the open handle, so it matches the bytes that will be read
    /// even if the name is replaced afterwards.
    pub async fn open_file(&self, name: &str) -> Result<Option<(File, u64)>> {
        let path = self.path_of(name)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some((file, meta.len())))
    }

    /// Create or truncate `name` for writing.
    pub async fn create_file(&self, name: &str) -> Result<File> {
        let path = self.path_of(name)?;
        Ok(File::create(&path).await?)
    }

    /// Remove `name` from the store.
    pub async fn remove_file(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).await?;
        Ok(())
    }
}
