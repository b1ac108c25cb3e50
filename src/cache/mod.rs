//! Persistent account cache keyed by account fingerprint.
//!
//! The cache stores the derived [`AccountState`] of each account between
//! invocations so that authentication tokens and discovered endpoints can be
//! reused. It is an optimisation only: a cache that cannot be read degrades to
//! an in-memory store and the caller receives a
//! [`ClusterError::CacheUnavailable`] signal instead of a failure.

use std::collections::BTreeMap;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::{Dir, OpenOptions};
use cap_std::ambient_authority;
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountState};
use crate::error::ClusterError;

/// File name of the cache inside the flotilla home directory.
pub const CACHE_FILE_NAME: &str = "cache.json";

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
struct CacheDocument {
    version: u32,
    #[serde(default)]
    accounts: BTreeMap<String, AccountState>,
}

/// Fingerprint-keyed store of derived account state.
#[derive(Debug, Default)]
pub struct Cache {
    path: Option<Utf8PathBuf>,
    accounts: BTreeMap<String, AccountState>,
}

/// Result of [`Cache::open`]: the usable cache and, when the file could not be
/// used, the reason it was ignored.
#[derive(Debug)]
pub struct CacheLoad {
    /// Cache ready for use.
    pub cache: Cache,
    /// Set when the cache degraded to memory only.
    pub warning: Option<ClusterError>,
}

impl Cache {
    /// Opens the cache stored at `path`.
    ///
    /// A missing file yields an empty persistent cache. A file that cannot be
    /// read or parsed, or that was written by a newer release, yields an
    /// empty in-memory cache together with a warning.
    #[must_use]
    pub fn open(path: impl Into<Utf8PathBuf>) -> CacheLoad {
        let path = path.into();
        match load_document(&path) {
            Ok(accounts) => {
                tracing::debug!(path = %path, entries = accounts.len(), "loaded account cache");
                CacheLoad {
                    cache: Self {
                        path: Some(path),
                        accounts,
                    },
                    warning: None,
                }
            }
            Err(message) => {
                tracing::warn!(path = %path, "ignoring account cache: {message}");
                CacheLoad {
                    cache: Self::disabled(),
                    warning: Some(ClusterError::CacheUnavailable {
                        message: format!("{path}: {message}"),
                    }),
                }
            }
        }
    }

    /// An in-memory cache that never touches the file system.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            path: None,
            accounts: BTreeMap::new(),
        }
    }

    /// Location of the backing file, when the cache is persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Number of cached accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Copies cached derived fields onto the account. Identity fields are
    /// never touched; an unknown account is left as is.
    ///
    /// Returns `true` when an entry was applied.
    pub fn apply(&self, account: &mut Account) -> bool {
        let Some(state) = self.accounts.get(&account.fingerprint()) else {
            return false;
        };
        tracing::debug!(cloud = %account.cloud(), "hydrating account from cache");
        account.replace_state(state.clone());
        true
    }

    /// Records the account's derived state and writes the cache to disk.
    ///
    /// Write failures are logged and otherwise ignored.
    pub fn save_account(&mut self, account: &Account) {
        let key = account.fingerprint();
        let state = account.state();
        let changed = if state.is_empty() {
            self.accounts.remove(&key).is_some()
        } else if self.accounts.get(&key) == Some(state) {
            false
        } else {
            self.accounts.insert(key, state.clone());
            true
        };
        if !changed {
            return;
        }
        if let Err(err) = self.flush() {
            tracing::warn!("unable to save account cache: {err}");
        }
    }

    /// Writes every entry to a temporary file beside the cache and renames it
    /// into place. A disabled cache does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Io`] when the directory cannot be opened or the
    /// file cannot be written, or [`ClusterError::Decode`] when serialisation
    /// fails.
    pub fn flush(&self) -> Result<(), ClusterError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let document = CacheDocument {
            version: CACHE_VERSION,
            accounts: self.accounts.clone(),
        };
        let rendered =
            serde_json::to_vec_pretty(&document).map_err(|err| ClusterError::Decode {
                action: String::from("serialise account cache"),
                message: err.to_string(),
            })?;

        let (parent, file_name) = split(path)?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| ClusterError::io(parent, &err))?;
        let temp_name = format!(".{file_name}.tmp");
        write_private(&dir, &temp_name, &rendered)
            .map_err(|err| ClusterError::io(parent.join(&temp_name), &err))?;
        dir.rename(&temp_name, &dir, file_name)
            .map_err(|err| ClusterError::io(path, &err))?;
        tracing::debug!(path = %path, entries = self.accounts.len(), "saved account cache");
        Ok(())
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), ClusterError> {
    let file_name = path.file_name().ok_or_else(|| ClusterError::Io {
        path: path.to_path_buf(),
        message: String::from("cache path is missing a file name"),
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, file_name))
}

fn load_document(path: &Utf8Path) -> Result<BTreeMap<String, AccountState>, String> {
    let (parent, file_name) = split(path).map_err(|err| err.to_string())?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| format!("unable to create {parent}: {err}"))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| format!("unable to open {parent}: {err}"))?;
    let exists = dir
        .try_exists(file_name)
        .map_err(|err| format!("unable to inspect file: {err}"))?;
    if !exists {
        return Ok(BTreeMap::new());
    }

    let contents = dir
        .read_to_string(file_name)
        .map_err(|err| format!("unable to read file: {err}"))?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let document: CacheDocument =
        serde_json::from_str(&contents).map_err(|err| format!("unable to parse file: {err}"))?;
    if document.version > CACHE_VERSION {
        return Err(format!(
            "cache version {} is newer than supported version {CACHE_VERSION}",
            document.version
        ));
    }
    Ok(document.accounts)
}

fn write_private(dir: &Dir, name: &str, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use cap_std::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = dir.open_with(name, &options)?;
    file.write_all(contents)?;
    file.sync_all()
}
