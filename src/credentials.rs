//! Storage for the access/refresh credential pair.
//!
//! The store is the only state shared by every in-flight call.  It is handed
//! to the client explicitly, so tests use [`MemoryCredentialStore`] while the
//! chat binary uses [`FileCredentialStore`] to keep the login across restarts.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::types::CredentialPair;

/// Process-wide holder of the current credential pair.
///
/// Implementations must make `set` and `clear` atomic with respect to `get`:
/// a reader observes either the old pair or the new pair, never a mix.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored pair, if any.
    fn get(&self) -> Option<CredentialPair>;

    /// Replaces the stored pair.
    fn set(&self, pair: CredentialPair) -> Result<()>;

    /// Removes the stored pair.  Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// A credential store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    pair: Mutex<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `pair`.
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, pair: CredentialPair) -> Result<()> {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// A credential store persisted as a JSON file.
///
/// The file is loaded once on open and cached; writes go to a sibling
/// temporary file that is renamed over the original so the pair on disk is
/// always complete.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cached: Mutex<Option<CredentialPair>>,
}

impl FileCredentialStore {
    /// Opens the store at `path`, loading any previously saved pair.
    ///
    /// A missing file is an empty store.  An unreadable or corrupt file is an
    /// error so that a bad path is not silently treated as "logged out".
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = match fs::read(&path) {
            Ok(bytes) => Some(serde_json::from_slice::<CredentialPair>(&bytes).map_err(|e| {
                Error::serialization(
                    format!("failed to parse credential file {}: {e}", path.display()),
                    Some(Box::new(e)),
                )
            })?),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(Error::io(
                    format!("failed to read credential file {}", path.display()),
                    err,
                ));
            }
        };
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    /// Returns the default location, `<config dir>/zerox/credentials.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("zerox").join("credentials.json"))
    }

    /// The file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create credential directory", e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(pair)?;
        // A leftover temp file keeps its old mode across truncation.
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(Error::io("failed to remove stale credential file", err)),
        }
        let mut file =
            open_owner_only(&tmp).map_err(|e| Error::io("failed to create credential file", e))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::io("failed to write credential file", e))?;
        drop(file);
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::io("failed to replace credential file", e))
    }
}

/// Creates `path` for writing, readable only by its owner on Unix.
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, pair: CredentialPair) -> Result<()> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_file(&pair)?;
        *cached = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io("failed to remove credential file", err)),
        }
    }
}
