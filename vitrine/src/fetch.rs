//! Translates filesystem paths to object-store keys and populates the
//! caches.

use crate::{
    cache::{AttributeCache, DirectoryCache, FileCache},
    store::{ListEntry, ObjectStore, StoreError},
    util,
};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no such entry: {path}")]
    NotFound { path: String },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("invalid remote timestamp: {source}")]
    Timestamp {
        #[from]
        source: chrono::ParseError,
    },
    #[error("store error: {source}")]
    Store { source: StoreError },
}

pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    /// errno equivalent for the kernel adapter.
    pub fn errno(&self) -> i32 {
        match self {
            FetchError::NotFound { .. } => libc::ENOENT,
            _ => libc::EIO,
        }
    }

    fn from_store(source: StoreError, path: &str) -> Self {
        match source {
            StoreError::NotFound { .. } => FetchError::NotFound {
                path: path.to_string(),
            },
            source => FetchError::Store { source },
        }
    }
}

/// Stateless facade between cache keys (mount-relative paths) and the
/// remote store. Callers hold the mount lock across every call.
pub struct Fetcher {
    store: Arc<dyn ObjectStore>,
    scratch_dir: PathBuf,
}

impl Fetcher {
    /// Creates the scratch directory if it is absent.
    pub fn new(store: Arc<dyn ObjectStore>, scratch_dir: impl AsRef<Path>) -> io::Result<Self> {
        std::fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            store,
            scratch_dir: scratch_dir.as_ref().into(),
        })
    }

    /// Local body of `path`, downloaded whole if the cache has no fresh
    /// copy.
    pub fn fetch_file(&self, files: &mut FileCache, path: &str) -> Result<PathBuf> {
        files.expire()?;

        if let Some(local) = files.scratch_path(path) {
            return Ok(local.to_owned());
        }

        files.compact()?;

        let key = path.trim_start_matches('/');
        let body = self
            .store
            .get(key)
            .map_err(|source| FetchError::from_store(source, path))?;

        // A failed write drops the temporary file, which unlinks it; the
        // cache never sees a partial download.
        let mut scratch = tempfile::Builder::new().tempfile_in(&self.scratch_dir)?;
        scratch.write_all(&body)?;
        scratch.flush()?;
        let (handle, local) = scratch.keep().map_err(|persist| persist.error)?;
        drop(handle);

        files.insert(path, local.clone(), body.len() as u64)?;
        tracing::debug!(path, size = body.len(), "cached remote object");

        Ok(local)
    }

    /// Children of `path`, listing the remote prefix if the cache has no
    /// fresh entry. Attributes for every listed child are recorded in
    /// the same pass.
    pub fn fetch_directory(
        &self,
        directories: &mut DirectoryCache,
        attributes: &mut AttributeCache,
        path: &str,
    ) -> Result<Vec<String>> {
        directories.expire();

        if let Some(children) = directories.children(path) {
            return Ok(children.to_vec());
        }

        let prefix = prefix_for(path);
        let listed = self
            .store
            .list(&prefix)
            .map_err(|source| FetchError::from_store(source, path))?;

        let children: Vec<String> = listed
            .iter()
            .map(|entry| util::basename(entry.name()).to_string())
            .collect();
        directories.insert(path, children.clone());

        for entry in &listed {
            let child_path = format!("/{}", entry.name().trim_end_matches('/'));

            match entry {
                ListEntry::Prefix(_) => attributes.insert_directory(child_path),
                ListEntry::Object(meta) => attributes.insert_file(child_path, meta)?,
            }
        }

        tracing::debug!(path, children = children.len(), "cached remote listing");
        Ok(children)
    }
}

/// Remote prefix for a directory path: slashes stripped, delimiter
/// appended. The root maps to the empty prefix.
fn prefix_for(path: &str) -> String {
    let prefixed = format!("{}/", path.trim_end_matches('/'));
    prefixed.trim_start_matches('/').to_string()
}
