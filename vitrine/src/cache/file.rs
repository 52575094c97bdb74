use std::{
    collections::{HashMap, VecDeque},
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

/// A whole-object download materialised on local disk.
pub struct ScratchFile {
    inserted: Instant,
    local: PathBuf,
    size: u64,
}

impl ScratchFile {
    pub fn local(&self) -> &Path {
        &self.local
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Path → scratch-file map with eviction by age, entry count and byte
/// budget.
///
/// Eviction order is insertion order: re-inserting a path replaces the
/// entry and moves it to the back of the queue, so the front is always
/// the stalest download. A single object larger than the byte budget is
/// still admitted; the next [`compact`][FileCache::compact] evicts it.
pub struct FileCache {
    lifetime: Duration,
    max_bytes: u64,
    max_files: usize,
    entries: HashMap<String, ScratchFile>,
    queue: VecDeque<String>,
    total_bytes: u64,
}

impl FileCache {
    pub fn new(lifetime: Duration, max_bytes: u64, max_files: usize) -> Self {
        Self {
            lifetime,
            max_bytes,
            max_files,
            entries: HashMap::new(),
            queue: VecDeque::new(),
            total_bytes: 0,
        }
    }

    /// Record a downloaded body. An existing entry for the same path is
    /// dropped first so the queue and the byte counter stay in sync.
    pub fn insert(&mut self, path: impl Into<String>, local: PathBuf, size: u64) -> io::Result<()> {
        let path = path.into();

        if self.entries.contains_key(&path) {
            self.remove(&path)?;
        }

        self.queue.push_back(path.clone());
        self.total_bytes += size;
        self.entries.insert(
            path,
            ScratchFile {
                inserted: Instant::now(),
                local,
                size,
            },
        );

        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Local body of the cached object, if present.
    pub fn scratch_path(&self, path: &str) -> Option<&Path> {
        self.entries.get(path).map(ScratchFile::local)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently held on disk.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Drop entries from the front of the queue while they have
    /// outlived the lifetime.
    pub fn expire(&mut self) -> io::Result<()> {
        loop {
            let stale = match self.queue.front() {
                Some(front) => match self.entries.get(front) {
                    Some(entry) => entry.inserted.elapsed() > self.lifetime,
                    None => true,
                },
                None => false,
            };

            if !stale {
                break;
            }
            self.pop_front()?;
        }

        Ok(())
    }

    /// Enforce the count and byte budgets by dropping from the front of
    /// the queue.
    pub fn compact(&mut self) -> io::Result<()> {
        while self.queue.len() > self.max_files || self.total_bytes > self.max_bytes {
            self.pop_front()?;
        }

        Ok(())
    }

    /// Drop every entry, unlinking the backing scratch files.
    pub fn purge(&mut self) -> io::Result<()> {
        while !self.queue.is_empty() {
            self.pop_front()?;
        }

        Ok(())
    }

    fn pop_front(&mut self) -> io::Result<()> {
        if let Some(path) = self.queue.front().cloned() {
            self.remove(&path)?;
        }

        Ok(())
    }

    /// All four steps happen together: queue, table, byte counter,
    /// backing file. A queue position already removed by an earlier
    /// eviction is tolerated, as is a scratch file that is already gone.
    fn remove(&mut self, path: &str) -> io::Result<()> {
        if let Some(at) = self.queue.iter().position(|queued| queued == path) {
            self.queue.remove(at);
        }

        if let Some(entry) = self.entries.remove(path) {
            self.total_bytes -= entry.size;

            match fs::remove_file(&entry.local) {
                Err(source) if source.kind() != io::ErrorKind::NotFound => return Err(source),
                _ => {}
            }
        }

        Ok(())
    }
}
