//! Local Store: the directory the sync pipeline exclusively owns.
//!
//! Where that directory lives is platform policy, so it sits behind the
//! [`LocalStore`] trait. Everything else (file names, layout, create/clear)
//! is derived from `app_data_dir()` by provided methods.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};

use crate::transcode::CANONICAL_EXT;

/// Synced dataset file, relative to the app data dir.
pub const DATASET_FILE: &str = "dataset.json";

/// Cached image directory, relative to the app data dir.
pub const IMAGES_DIR: &str = "recipe_images";

/// Directory, under the runtime or temp dir, holding per-store sync locks.
pub const LOCK_DIR_NAME: &str = "purefood-sync";

/// Name of the dot-folder used by [`HomeDirStore`].
pub const HOME_DIR_NAME: &str = ".purefood";

pub trait LocalStore: Send + Sync + std::fmt::Debug {
    /// Root of the owned directory tree. Must be stable across runs.
    fn app_data_dir(&self) -> &Path;

    fn dataset_path(&self) -> PathBuf {
        self.app_data_dir().join(DATASET_FILE)
    }

    fn images_dir(&self) -> PathBuf {
        self.app_data_dir().join(IMAGES_DIR)
    }

    /// Canonical cached image path for a record id.
    fn asset_path(&self, id: u32) -> PathBuf {
        self.images_dir().join(format!("{}.{}", id, CANONICAL_EXT))
    }

    /// Advisory lock held while a sync is running. Lives outside the app
    /// data dir, keyed by its absolute path, so taking it leaves the store
    /// untouched.
    fn lock_path(&self) -> PathBuf {
        let dir = self.app_data_dir();
        let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut hasher = DefaultHasher::new();
        dir.hash(&mut hasher);
        lock_dir().join(format!("{:016x}.lock", hasher.finish()))
    }

    /// Create the app data dir if needed and return it.
    fn ensure(&self) -> io::Result<PathBuf> {
        let dir = self.app_data_dir();
        std::fs::create_dir_all(dir)?;
        Ok(dir.to_path_buf())
    }

    /// Delete the dataset file and the whole image directory. Missing
    /// artifacts are not an error.
    fn clear(&self) -> io::Result<()> {
        remove_if_exists(std::fs::remove_file(self.dataset_path()))?;
        remove_if_exists(std::fs::remove_dir_all(self.images_dir()))?;
        tracing::debug!("Cleared local data in {}", self.app_data_dir().display());
        Ok(())
    }
}

fn lock_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(LOCK_DIR_NAME)
}

fn remove_if_exists(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Store rooted at an explicit directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LocalStore for DirStore {
    fn app_data_dir(&self) -> &Path {
        &self.root
    }
}

/// Desktop resolution: `~/.purefood`.
#[derive(Debug, Clone)]
pub struct HomeDirStore {
    root: PathBuf,
}

impl HomeDirStore {
    /// Resolve against the current user's home directory. Returns `None`
    /// when no home directory can be determined.
    pub fn resolve() -> Option<Self> {
        dirs::home_dir().map(|home| Self {
            root: home.join(HOME_DIR_NAME),
        })
    }
}

impl LocalStore for HomeDirStore {
    fn app_data_dir(&self) -> &Path {
        &self.root
    }
}
