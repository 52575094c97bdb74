use super::PathCache;
use std::time::Duration;

/// Per-path child-name lists, stored in listing order.
pub struct DirectoryCache {
    entries: PathCache<Vec<String>>,
}

impl DirectoryCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: PathCache::new(lifetime),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, children: Vec<String>) {
        self.entries.insert(path, children);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains(path)
    }

    /// Children of `path`, if a listing is cached.
    pub fn children(&self, path: &str) -> Option<&[String]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn expire(&mut self) {
        self.entries.expire();
    }

    pub fn purge(&mut self) {
        self.entries.purge();
    }
}
