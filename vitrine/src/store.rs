//! The seam between cache keys and the remote object store.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no such object: {key}")]
    NotFound { key: String },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("store error: {source}")]
    Generic {
        #[from]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Metadata for one listed object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Full key within the bucket.
    pub key: String,
    pub size: u64,
    /// ISO-8601 timestamp as reported by the store.
    pub last_modified: String,
}

/// One result of a delimited listing.
#[derive(Debug, Clone)]
pub enum ListEntry {
    Object(ObjectMeta),
    /// Common prefix, trailing delimiter included.
    Prefix(String),
}

impl ListEntry {
    /// Full name of the entry as reported by the store.
    pub fn name(&self) -> &str {
        match self {
            ListEntry::Object(meta) => &meta.key,
            ListEntry::Prefix(prefix) => prefix,
        }
    }
}

/// Read-only view of one remote bucket.
///
/// Keys are bucket-relative, without a leading slash. Listings use `/`
/// as the delimiter and yield entries in lexicographic key order.
pub trait ObjectStore: Send + Sync {
    /// Fetch a whole object body.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// List keys and common prefixes directly under `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<ListEntry>>;
}

#[cfg(any(test, feature = "test"))]
pub mod memory {
    use super::*;
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    struct StoredObject {
        body: Vec<u8>,
        last_modified: String,
    }

    /// In-memory bucket for tests. Counts remote round-trips so callers
    /// can assert on cache behaviour.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<BTreeMap<String, StoredObject>>,
        downloads: AtomicUsize,
        listings: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
            self.put_with_mtime(key, body, "2012-09-30T12:00:00.000Z");
        }

        pub fn put_with_mtime(
            &self,
            key: impl Into<String>,
            body: impl Into<Vec<u8>>,
            last_modified: impl Into<String>,
        ) {
            self.objects.lock().unwrap().insert(
                key.into(),
                StoredObject {
                    body: body.into(),
                    last_modified: last_modified.into(),
                },
            );
        }

        pub fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }

        pub fn listings(&self) -> usize {
            self.listings.load(Ordering::SeqCst)
        }
    }

    impl ObjectStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);

            self.objects
                .lock()
                .unwrap()
                .get(key)
                .map(|object| object.body.clone())
                .ok_or_else(|| StoreError::NotFound {
                    key: key.to_string(),
                })
        }

        fn list(&self, prefix: &str) -> Result<Vec<ListEntry>> {
            self.listings.fetch_add(1, Ordering::SeqCst);

            let objects = self.objects.lock().unwrap();
            let mut entries = Vec::new();
            let mut last_prefix: Option<String> = None;

            for (key, object) in objects.range(prefix.to_string()..) {
                if !key.starts_with(prefix) {
                    break;
                }

                match key[prefix.len()..].find('/') {
                    Some(at) => {
                        let common = format!("{}/", &key[..prefix.len() + at]);
                        if last_prefix.as_deref() != Some(common.as_str()) {
                            entries.push(ListEntry::Prefix(common.clone()));
                            last_prefix = Some(common);
                        }
                    }
                    None => entries.push(ListEntry::Object(ObjectMeta {
                        key: key.clone(),
                        size: object.body.len() as u64,
                        last_modified: object.last_modified.clone(),
                    })),
                }
            }

            Ok(entries)
        }
    }

}
