use super::PathCache;
use crate::store::ObjectMeta;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Mode bits served for every regular file.
pub const FILE_MODE: u32 = (libc::S_IFREG as u32) | 0o600;
/// Mode bits served for every directory.
pub const DIRECTORY_MODE: u32 = (libc::S_IFDIR as u32) | 0o700;

/// Per-path stat material: fixed mode bits, object size, remote mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    pub mode: u32,
    pub size: u64,
    /// Seconds since the epoch.
    pub modified: i64,
}

/// Attribute cache for `getattr`, filled as a side effect of directory
/// listings.
pub struct AttributeCache {
    entries: PathCache<FileAttributes>,
}

impl AttributeCache {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: PathCache::new(lifetime),
        }
    }

    /// Record a directory. Directories have no remote metadata of their
    /// own: size 0, mtime is the time of insertion.
    pub fn insert_directory(&mut self, path: impl Into<String>) {
        self.entries.insert(
            path,
            FileAttributes {
                mode: DIRECTORY_MODE,
                size: 0,
                modified: Utc::now().timestamp(),
            },
        );
    }

    /// Record a regular file from its listing entry. The remote reports
    /// the modification time as an ISO-8601 string.
    pub fn insert_file(
        &mut self,
        path: impl Into<String>,
        meta: &ObjectMeta,
    ) -> Result<(), chrono::ParseError> {
        let modified = DateTime::parse_from_rfc3339(&meta.last_modified)?.timestamp();

        self.entries.insert(
            path,
            FileAttributes {
                mode: FILE_MODE,
                size: meta.size,
                modified,
            },
        );

        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains(path)
    }

    pub fn get(&self, path: &str) -> Option<&FileAttributes> {
        self.entries.get(path)
    }

    pub fn expire(&mut self) {
        self.entries.expire();
    }

    pub fn purge(&mut self) {
        self.entries.purge();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn meta(key: &str, size: u64, last_modified: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size,
            last_modified: last_modified.to_string(),
        }
    }

    #[test]
    fn file_entries_parse_the_remote_timestamp() {
        let mut cache = AttributeCache::new(Duration::from_secs(60));
        cache
            .insert_file("/a.txt", &meta("a.txt", 10, "2012-09-30T12:00:00.000Z"))
            .unwrap();

        let attributes = cache.get("/a.txt").unwrap();
        assert_eq!(attributes.mode, FILE_MODE);
        assert_eq!(attributes.size, 10);
        assert_eq!(attributes.modified, 1_349_006_400);
    }

    #[test]
    fn unparseable_timestamps_are_an_error() {
        let mut cache = AttributeCache::new(Duration::from_secs(60));
        let result = cache.insert_file("/a.txt", &meta("a.txt", 10, "yesterday-ish"));

        assert!(result.is_err());
        assert!(!cache.contains("/a.txt"));
    }

    #[test]
    fn directory_entries_have_no_size() {
        let mut cache = AttributeCache::new(Duration::from_secs(60));
        cache.insert_directory("/dir");

        let attributes = cache.get("/dir").unwrap();
        assert_eq!(attributes.mode, DIRECTORY_MODE);
        assert_eq!(attributes.size, 0);
    }
}
