//! Single-document JSON persistence with atomic replacement.
//!
//! Every save writes the whole document to a sibling temp file, syncs it,
//! renames it over the target and syncs the directory, so a reader never
//! observes a half-written store.
//!
//! A writable handle holds an exclusive OS lock on `.<name>.lock` for its
//! whole lifetime. A second writer on the same document, in this process
//! or another, fails to open instead of silently overwriting the first.
//! Writers inside one handle are serialized by its owner.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use eppn_shared::{EppnError, Result};

/// Handle to one JSON document on disk.
#[derive(Debug)]
pub(crate) struct JsonStore {
    path: PathBuf,
    /// Held until drop; `None` for read-only handles.
    lock: Option<File>,
}

impl JsonStore {
    /// Open `path` for writing, taking the store's exclusive lock.
    pub(crate) fn open_exclusive(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EppnError::persistence(parent, e.to_string()))?;
            }
        }

        let lock_path = sibling(&path, "lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| EppnError::persistence(&lock_path, e.to_string()))?;

        lock.try_lock_exclusive().map_err(|e| {
            if e.kind() == fs2::lock_contended_error().kind() {
                EppnError::persistence(&path, "store is already open for writing elsewhere")
            } else {
                EppnError::persistence(&lock_path, format!("cannot lock store: {e}"))
            }
        })?;

        debug!(path = %path.display(), "store lock acquired");
        Ok(Self {
            path,
            lock: Some(lock),
        })
    }

    /// Open `path` for reading only. Takes no lock and never writes.
    pub(crate) fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: None,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, creating it from `init` when the file is absent.
    /// A read-only handle returns `init` without writing it.
    ///
    /// An existing file that cannot be read or parsed is an error; it is
    /// never replaced with a fresh document.
    pub(crate) fn load_or_create<T, F>(&self, init: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                EppnError::persistence(&self.path, format!("corrupt document: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let doc = init();
                if self.lock.is_some() {
                    self.save(&doc)?;
                    info!(path = %self.path.display(), "initialized empty store");
                }
                Ok(doc)
            }
            Err(e) => Err(EppnError::persistence(&self.path, e.to_string())),
        }
    }

    /// Atomically replace the document on disk.
    pub(crate) fn save<T: Serialize>(&self, doc: &T) -> Result<()> {
        if self.lock.is_none() {
            return Err(EppnError::persistence(&self.path, "store is open read-only"));
        }

        let json = serde_json::to_vec_pretty(doc)
            .map_err(|e| EppnError::persistence(&self.path, format!("serialize: {e}")))?;

        let temp = sibling(&self.path, "tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&temp, &self.path)?;
            sync_parent(&self.path)
        };

        if let Err(e) = write() {
            let _ = std::fs::remove_file(&temp);
            return Err(EppnError::persistence(&self.path, e.to_string()));
        }

        debug!(path = %self.path.display(), bytes = json.len(), "saved document");
        Ok(())
    }
}

/// `.<file name>.<suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".into());
    path.with_file_name(format!(".{name}.{suffix}"))
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
