//! Persistence of saved stops and settings.
//!
//! Two key–value entries are kept as JSON documents: the saved stop list and
//! the favorites bound. Each write replaces the whole document.

use std::{
    fs,
    io::Write,
    path::PathBuf,
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::models::SavedStop;

const STOPS_FILE: &str = "saved_stops.json";
const MAX_FAVORITES_FILE: &str = "max_favorites.json";

/// Load/save hooks used by the stop store.
pub trait StopPersistence: Send + Sync {
    /// Saved stops, or `None` if nothing was ever saved.
    fn load_stops(&self) -> Result<Option<Vec<SavedStop>>>;
    /// Replace the saved stop list.
    fn save_stops(&self, stops: &[SavedStop]) -> Result<()>;
    /// Stored favorites bound, or `None` if never set.
    fn load_max_favorites(&self) -> Result<Option<u8>>;
    /// Replace the stored favorites bound.
    fn save_max_favorites(&self, value: u8) -> Result<()>;
}

/// JSON files under a data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create storage rooted at the provided directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_entry<T: DeserializeOwned>(&self, file_name: &str) -> Result<Option<T>> {
        let path = self.root.join(file_name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    /// Write through a temporary file in the same directory and rename it into
    /// place, so readers only ever see a complete document.
    fn write_entry<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let path = self.root.join(file_name);
        let serialised = serde_json::to_vec_pretty(value)?;
        let mut file = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("failed to create temp file in {}", self.root.display()))?;
        file.write_all(&serialised)
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.persist(&path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

impl StopPersistence for FileStorage {
    fn load_stops(&self) -> Result<Option<Vec<SavedStop>>> {
        self.read_entry(STOPS_FILE)
    }

    fn save_stops(&self, stops: &[SavedStop]) -> Result<()> {
        self.write_entry(STOPS_FILE, stops)
    }

    fn load_max_favorites(&self) -> Result<Option<u8>> {
        self.read_entry(MAX_FAVORITES_FILE)
    }

    fn save_max_favorites(&self, value: u8) -> Result<()> {
        self.write_entry(MAX_FAVORITES_FILE, &value)
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryStorage;

#[cfg(test)]
mod memory {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use anyhow::{anyhow, bail, Result};

    use super::StopPersistence;
    use crate::models::SavedStop;

    /// In-memory persistence with switchable write failures.
    #[derive(Default)]
    pub struct MemoryStorage {
        stops: Mutex<Option<Vec<SavedStop>>>,
        max_favorites: Mutex<Option<u8>>,
        fail_writes: AtomicBool,
    }

    impl MemoryStorage {
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn stops(&self) -> Option<Vec<SavedStop>> {
            self.stops.lock().ok().and_then(|stops| stops.clone())
        }

        fn check_writable(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                bail!("storage unavailable");
            }
            Ok(())
        }
    }

    impl StopPersistence for MemoryStorage {
        fn load_stops(&self) -> Result<Option<Vec<SavedStop>>> {
            Ok(self.stops())
        }

        fn save_stops(&self, stops: &[SavedStop]) -> Result<()> {
            self.check_writable()?;
            *self.stops.lock().map_err(|_| anyhow!("poisoned"))? = Some(stops.to_vec());
            Ok(())
        }

        fn load_max_favorites(&self) -> Result<Option<u8>> {
            Ok(self.max_favorites.lock().ok().and_then(|value| *value))
        }

        fn save_max_favorites(&self, value: u8) -> Result<()> {
            self.check_writable()?;
            *self.max_favorites.lock().map_err(|_| anyhow!("poisoned"))? = Some(value);
            Ok(())
        }
    }
}
