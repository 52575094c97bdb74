//! Filesystem request handlers atop the caches and the fetcher.

use crate::{
    cache::{AttributeCache, DirectoryCache, FileAttributes, FileCache, DIRECTORY_MODE},
    fetch::{FetchError, Fetcher, Result},
    store::ObjectStore,
    util,
};
use parking_lot::Mutex;
use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
    sync::Arc,
    time::Duration,
};

/// Answer to a `getattr` request.
#[derive(Debug, Clone, Copy)]
pub struct Attributes {
    pub mode: u32,
    pub size: u64,
    /// Seconds since the epoch.
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
}

/// Cache lifetimes and budgets for one mount.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub attribute_lifetime: Duration,
    pub directory_lifetime: Duration,
    pub file_lifetime: Duration,
    pub file_max_bytes: u64,
    pub file_max_files: usize,
}

struct Caches {
    attributes: AttributeCache,
    directories: DirectoryCache,
    files: FileCache,
}

/// One mounted bucket: the three caches behind the mount lock, and the
/// fetcher that fills them.
///
/// Every handler takes the lock on entry; remote round-trips happen
/// inside the critical section, serialising the mount the same way the
/// single-threaded kernel session does.
pub struct Viewport {
    caches: Mutex<Caches>,
    fetcher: Fetcher,
    uid: u32,
    gid: u32,
}

impl Viewport {
    /// Build the caches for one mount. Records the invoking user and
    /// group as the owner of everything served; creates `scratch_dir`
    /// if it is absent.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scratch_dir: impl AsRef<Path>,
        options: CacheOptions,
    ) -> io::Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(store, scratch_dir)?,
            caches: Mutex::new(Caches {
                attributes: AttributeCache::new(options.attribute_lifetime),
                directories: DirectoryCache::new(options.directory_lifetime),
                files: FileCache::new(
                    options.file_lifetime,
                    options.file_max_bytes,
                    options.file_max_files,
                ),
            }),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        })
    }

    /// stat material for `path`. A miss lists the parent directory to
    /// fill the attribute cache before giving up.
    pub fn getattr(&self, path: &str) -> Result<Attributes> {
        let path = util::normalize(path);

        // The root exists even when the bucket is empty.
        if path == "/" {
            return Ok(Attributes {
                mode: DIRECTORY_MODE,
                size: 0,
                mtime: 0,
                uid: self.uid,
                gid: self.gid,
            });
        }

        let mut caches = self.caches.lock();
        caches.attributes.expire();

        if !caches.attributes.contains(path) {
            let Caches {
                directories,
                attributes,
                ..
            } = &mut *caches;
            self.fetcher
                .fetch_directory(directories, attributes, util::parent(path))?;
        }

        match caches.attributes.get(path) {
            Some(&FileAttributes {
                mode,
                size,
                modified,
            }) => Ok(Attributes {
                mode,
                size,
                mtime: modified,
                uid: self.uid,
                gid: self.gid,
            }),
            None => Err(FetchError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Children of `path`, `.` and `..` included.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let path = util::normalize(path);

        let mut caches = self.caches.lock();
        let Caches {
            directories,
            attributes,
            ..
        } = &mut *caches;
        let children = self
            .fetcher
            .fetch_directory(directories, attributes, path)?;

        let mut names = Vec::with_capacity(children.len() + 2);
        names.push(".".to_string());
        names.push("..".to_string());
        names.extend(children);

        Ok(names)
    }

    /// Up to `size` bytes of `path` starting at `offset`. The download
    /// happens under the lock; the scratch file is immutable once
    /// admitted, so the read itself does not need it.
    pub fn read(&self, path: &str, size: u32, offset: u64) -> Result<Vec<u8>> {
        let path = util::normalize(path);

        let local = {
            let mut caches = self.caches.lock();
            self.fetcher.fetch_file(&mut caches.files, path)?
        };

        let mut file = File::open(&local)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut body = Vec::with_capacity(size as usize);
        file.take(u64::from(size)).read_to_end(&mut body)?;

        Ok(body)
    }

    /// Release every cache entry and unlink the scratch files.
    pub fn destroy(&self) {
        let mut caches = self.caches.lock();
        caches.attributes.purge();
        caches.directories.purge();

        if let Err(error) = caches.files.purge() {
            tracing::warn!(%error, "failed to clear scratch files");
        }
    }
}

#[cfg(test)]
mod test {
    use super::{CacheOptions, Viewport};
    use crate::{
        cache::{DIRECTORY_MODE, FILE_MODE},
        store::memory::MemoryStore,
    };
    use std::{sync::Arc, time::Duration};
    use tempfile::TempDir;

    fn options() -> CacheOptions {
        CacheOptions {
            attribute_lifetime: Duration::from_secs(3600),
            directory_lifetime: Duration::from_secs(3600),
            file_lifetime: Duration::from_secs(3600),
            file_max_bytes: 100_000_000,
            file_max_files: 1000,
        }
    }

    fn viewport(store: Arc<MemoryStore>, options: CacheOptions) -> (Viewport, TempDir) {
        let scratch = TempDir::new().unwrap();
        let viewport = Viewport::new(store, scratch.path().join("cache"), options).unwrap();
        (viewport, scratch)
    }

    #[test]
    fn listing_the_root_serves_attributes_without_another_round_trip() {
        let store = Arc::new(MemoryStore::new());
        store.put("a.txt", vec![0u8; 10]);
        store.put("b.txt", vec![0u8; 20]);
        let (viewport, _scratch) = viewport(store.clone(), options());

        let names = viewport.readdir("/").unwrap();
        assert_eq!(names, vec![".", "..", "a.txt", "b.txt"]);
        assert_eq!(store.listings(), 1);

        let attributes = viewport.getattr("/a.txt").unwrap();
        assert_eq!(attributes.mode, FILE_MODE);
        assert_eq!(attributes.mode, 0o100600);
        assert_eq!(attributes.size, 10);
        assert_eq!(store.listings(), 1);
    }

    #[test]
    fn common_prefixes_appear_as_directories() {
        let store = Arc::new(MemoryStore::new());
        store.put("dir/sub.txt", b"sub".to_vec());
        store.put("top.txt", b"top".to_vec());
        let (viewport, _scratch) = viewport(store, options());

        let names = viewport.readdir("/").unwrap();
        assert_eq!(names, vec![".", "..", "dir", "top.txt"]);

        let attributes = viewport.getattr("/dir").unwrap();
        assert_eq!(attributes.mode, DIRECTORY_MODE);
        assert_eq!(attributes.mode, 0o40700);
    }

    #[test]
    fn reads_at_an_offset_come_from_the_cached_body() {
        let store = Arc::new(MemoryStore::new());
        store.put("x", vec![0x41; 1000]);
        let (viewport, _scratch) = viewport(store.clone(), options());

        let body = viewport.read("/x", 100, 500).unwrap();
        assert_eq!(body, vec![0x41; 100]);

        let tail = viewport.read("/x", 100, 950).unwrap();
        assert_eq!(tail, vec![0x41; 50]);

        assert_eq!(store.downloads(), 1);
    }

    #[test]
    fn the_root_exists_without_touching_the_remote() {
        let store = Arc::new(MemoryStore::new());
        let (viewport, _scratch) = viewport(store.clone(), options());

        let attributes = viewport.getattr("/").unwrap();
        assert_eq!(attributes.mode, DIRECTORY_MODE);
        assert_eq!(store.listings(), 0);
    }

    #[test]
    fn an_empty_bucket_lists_dot_and_dot_dot() {
        let store = Arc::new(MemoryStore::new());
        let (viewport, _scratch) = viewport(store, options());

        assert_eq!(viewport.readdir("/").unwrap(), vec![".", ".."]);
    }

    #[test]
    fn trailing_slashes_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.put("dir/sub.txt", b"sub".to_vec());
        let (viewport, _scratch) = viewport(store.clone(), options());

        let plain = viewport.getattr("/dir").unwrap();
        let slashed = viewport.getattr("/dir/").unwrap();
        assert_eq!(plain.mode, slashed.mode);
        assert_eq!(store.listings(), 1);
    }

    #[test]
    fn missing_entries_are_no_such_entry() {
        let store = Arc::new(MemoryStore::new());
        store.put("a.txt", b"a".to_vec());
        let (viewport, _scratch) = viewport(store, options());

        let error = viewport.getattr("/nope").unwrap_err();
        assert_eq!(error.errno(), libc::ENOENT);

        let error = viewport.read("/nope", 10, 0).unwrap_err();
        assert_eq!(error.errno(), libc::ENOENT);
    }

    #[test]
    fn expired_attributes_trigger_a_fresh_listing() {
        let store = Arc::new(MemoryStore::new());
        store.put("a.txt", b"a".to_vec());
        let mut short = options();
        short.attribute_lifetime = Duration::from_millis(40);
        short.directory_lifetime = Duration::from_millis(40);
        let (viewport, _scratch) = viewport(store.clone(), short);

        viewport.getattr("/a.txt").unwrap();
        assert_eq!(store.listings(), 1);

        std::thread::sleep(Duration::from_millis(100));
        viewport.getattr("/a.txt").unwrap();
        assert_eq!(store.listings(), 2);
    }

    #[test]
    fn destroy_releases_the_scratch_files() {
        let store = Arc::new(MemoryStore::new());
        store.put("x", vec![0x41; 10]);
        let (viewport, scratch) = viewport(store, options());

        viewport.read("/x", 10, 0).unwrap();
        let cache_dir = scratch.path().join("cache");
        assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 1);

        viewport.destroy();
        assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);
    }
}
