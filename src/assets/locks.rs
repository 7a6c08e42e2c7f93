//! Per-asset async locks keyed by storage path.
//!
//! Ingestion, the transcoding worker and deletes all take the lock of the
//! path they touch, so at most one of them mutates an asset's files and row
//! at any time. A storage path belongs to exactly one asset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::OwnedMutexGuard;

type PathMutex = tokio::sync::Mutex<()>;

#[derive(Default)]
pub struct AssetLocks {
    entries: Mutex<HashMap<PathBuf, Weak<PathMutex>>>,
}

/// Held for as long as the asset at `path` must not be touched by anyone else.
#[must_use]
pub struct AssetLockGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl AssetLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AssetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of `path`.
    pub async fn lock(&self, path: &Path) -> AssetLockGuard {
        let mutex = self.entry(path);
        AssetLockGuard {
            path: path.to_path_buf(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Take the lock of `path` only if nobody holds it.
    pub fn try_lock(&self, path: &Path) -> Option<AssetLockGuard> {
        let mutex = self.entry(path);
        mutex.try_lock_owned().ok().map(|guard| AssetLockGuard {
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    /// Number of paths currently locked or awaited.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, path: &Path) -> Arc<PathMutex> {
        // The map only holds plain data, a poisoned lock is still consistent
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = entries.get(path).and_then(Weak::upgrade) {
            return existing;
        }
        let mutex = Arc::new(PathMutex::new(()));
        entries.insert(path.to_path_buf(), Arc::downgrade(&mutex));
        mutex
    }
}
