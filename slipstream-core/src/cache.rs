//! Filesystem-backed persistence for torrent bodies, resume blobs and
//! DHT state.
//!
//! The cache is strictly advisory: every failure degrades to "not
//! cached" and is reported at `warn!` level, never to the caller. Each
//! key is written at most once per session lifecycle (torrent body at
//! metadata fetch, resume and DHT state at shutdown), so concurrent
//! writers are not a concern.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::engine::InfoHash;

/// File name of the session-global DHT routing state.
pub const DHT_STATE_FILE: &str = "dht_state.dat";

const TEMP_SUFFIX: &str = ".tmp";

/// Cache key for a torrent's bencoded body.
pub fn torrent_file_name(info_hash: &InfoHash) -> String {
    format!("{info_hash}.torrent")
}

/// Cache key for a torrent's resume blob.
pub fn resume_file_name(info_hash: &InfoHash) -> String {
    format!("{info_hash}.resume")
}

/// Persistent key/value area under the host's cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: Option<PathBuf>,
}

impl CacheStore {
    /// Creates a store rooted at `dir`. `None`, or a directory that
    /// cannot be created, disables the store entirely; every operation
    /// then reports "not cached."
    pub fn new(dir: Option<PathBuf>) -> Self {
        let dir = dir.and_then(|dir| match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cache directory unusable, persistence disabled");
                None
            }
        });
        Self { dir }
    }

    /// Writes bencoded bytes under `name`, atomically replacing any
    /// previous contents. Returns the final path, or `None` when the
    /// store is disabled or the write failed.
    pub fn save(&self, name: &str, contents: &[u8]) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let path = dir.join(name);
        let staging = dir.join(format!("{name}{TEMP_SUFFIX}"));
        let result = fs::write(&staging, contents).and_then(|()| fs::rename(&staging, &path));
        match result {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(name, %err, "cache write failed");
                let _ = fs::remove_file(&staging);
                None
            }
        }
    }

    /// Returns the path of a readable cached entry, or `None`.
    pub fn lookup(&self, name: &str) -> Option<PathBuf> {
        let path = self.dir.as_ref()?.join(name);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Reads a cached entry's full contents, or `None` on any error.
    pub fn load(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.dir.as_ref()?.join(name);
        match fs::read(&path) {
            Ok(contents) => Some(contents),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(name, %err, "cache read failed");
                }
                None
            }
        }
    }

    /// Removes a cached entry, silently ignoring failure.
    pub fn delete(&self, name: &str) {
        if let Some(dir) = self.dir.as_ref() {
            let _ = fs::remove_file(dir.join(name));
        }
    }

    /// The directory backing this store, when persistence is enabled.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}
