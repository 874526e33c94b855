//! Favorites module - offline-tolerant user preference state
//!
//! The cache is the durable local copy of the preference set, readable
//! and writable while offline or signed out; [`FavoritesEngine`] keeps it
//! convergent with the backend's copy.

mod engine;

pub use engine::{FavoritesEngine, DEFAULT_NAMESPACE};

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use crate::Result;

/// Local cache trait - durable storage for one preference set per namespace
pub trait FavoritesCache: Send + Sync {
    /// Read the full set; an absent namespace reads as empty
    fn read_all(&self, namespace: &str) -> Result<HashSet<String>>;

    /// Replace the full set
    fn write_all(&self, namespace: &str, items: &HashSet<String>) -> Result<()>;
}

/// File-based cache, one JSON array per namespace
pub struct FileFavoritesCache {
    dir: PathBuf,
}

impl FileFavoritesCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Cache under the default location, `~/.bodega/favorites/`
    pub fn at_default_path() -> Self {
        Self::new(crate::config::config_dir().join("favorites"))
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }
}

impl FavoritesCache for FileFavoritesCache {
    fn read_all(&self, namespace: &str) -> Result<HashSet<String>> {
        let path = self.path_for(namespace);
        if !path.exists() {
            return Ok(HashSet::new());
        }

        let content = std::fs::read_to_string(&path)?;
        let items: Vec<String> = serde_json::from_str(&content)?;
        Ok(items.into_iter().collect())
    }

    fn write_all(&self, namespace: &str, items: &HashSet<String>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        // Sorted so the file is stable across writes of the same set
        let mut sorted: Vec<&String> = items.iter().collect();
        sorted.sort();

        let content = serde_json::to_string_pretty(&sorted)?;
        std::fs::write(self.path_for(namespace), content)?;
        Ok(())
    }
}

/// In-memory cache for testing
#[derive(Default)]
pub struct InMemoryFavoritesCache {
    map: Mutex<BTreeMap<String, HashSet<String>>>,
}

impl InMemoryFavoritesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated with a set for one namespace
    pub fn with_items(namespace: &str, items: &[&str]) -> Self {
        let cache = Self::new();
        let set = items.iter().map(|s| s.to_string()).collect();
        cache.map.lock().unwrap().insert(namespace.to_string(), set);
        cache
    }
}

impl FavoritesCache for InMemoryFavoritesCache {
    fn read_all(&self, namespace: &str) -> Result<HashSet<String>> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    fn write_all(&self, namespace: &str, items: &HashSet<String>) -> Result<()> {
        self.map
            .lock()
            .unwrap()
            .insert(namespace.to_string(), items.clone());
        Ok(())
    }
}
