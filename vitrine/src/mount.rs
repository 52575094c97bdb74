//! Kernel adapter: maps the inode-based FUSE protocol onto the
//! path-based handlers.

use crate::{fs::Attributes, util, Viewport};
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry,
    Request, FUSE_ROOT_ID,
};
use std::{
    collections::HashMap,
    ffi::OsStr,
    io,
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// How long the kernel may cache replies. Freshness is governed by the
/// mount's own caches; the kernel's copy stays short-lived.
const TTL: Duration = Duration::from_secs(1);

/// Inode numbers handed to the kernel, interned per path for the life
/// of the mount.
struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: FUSE_ROOT_ID + 1,
        };
        table.paths.insert(FUSE_ROOT_ID, "/".to_string());
        table.inodes.insert("/".to_string(), FUSE_ROOT_ID);
        table
    }

    fn intern(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }

        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }
}

/// [`fuser::Filesystem`] bridge over a [`Viewport`].
pub struct Mount {
    viewport: Arc<Viewport>,
    inodes: InodeTable,
}

impl Mount {
    pub fn new(viewport: Arc<Viewport>) -> Self {
        Self {
            viewport,
            inodes: InodeTable::new(),
        }
    }
}

fn kind_of(mode: u32) -> FileType {
    if mode & (libc::S_IFMT as u32) == (libc::S_IFDIR as u32) {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn timestamp(secs: i64) -> SystemTime {
    if secs <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    }
}

fn file_attr(ino: u64, attributes: &Attributes) -> FileAttr {
    let kind = kind_of(attributes.mode);
    let mtime = timestamp(attributes.mtime);

    FileAttr {
        ino,
        size: attributes.size,
        blocks: attributes.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        perm: (attributes.mode & 0o7777) as u16,
        nlink: if kind == FileType::Directory { 2 } else { 1 },
        uid: attributes.uid,
        gid: attributes.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

impl Filesystem for Mount {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent_path = match self.inodes.path(parent) {
            Some(path) => path.to_string(),
            None => return reply.error(libc::ENOENT),
        };
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::ENOENT),
        };

        let path = child_path(&parent_path, name);
        match self.viewport.getattr(&path) {
            Ok(attributes) => {
                let ino = self.inodes.intern(&path);
                reply.entry(&TTL, &file_attr(ino, &attributes), 0);
            }
            Err(error) => reply.error(error.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.inodes.path(ino) {
            Some(path) => path.to_string(),
            None => return reply.error(libc::ENOENT),
        };

        match self.viewport.getattr(&path) {
            Ok(attributes) => reply.attr(&TTL, &file_attr(ino, &attributes)),
            Err(error) => reply.error(error.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.inodes.path(ino) {
            Some(path) => path.to_string(),
            None => return reply.error(libc::ENOENT),
        };

        let names = match self.viewport.readdir(&path) {
            Ok(names) => names,
            Err(error) => return reply.error(error.errno()),
        };

        for (index, name) in names.iter().enumerate().skip(offset.max(0) as usize) {
            let (entry_ino, kind) = match name.as_str() {
                "." => (ino, FileType::Directory),
                ".." => (self.inodes.intern(util::parent(&path)), FileType::Directory),
                _ => {
                    let child = child_path(&path, name);
                    let kind = match self.viewport.getattr(&child) {
                        Ok(attributes) => kind_of(attributes.mode),
                        Err(_) => FileType::RegularFile,
                    };
                    (self.inodes.intern(&child), kind)
                }
            };

            if reply.add(entry_ino, (index + 1) as i64, kind, name) {
                break;
            }
        }

        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.inodes.path(ino) {
            Some(path) => path.to_string(),
            None => return reply.error(libc::ENOENT),
        };

        match self.viewport.read(&path, size, offset.max(0) as u64) {
            Ok(body) => reply.data(&body),
            Err(error) => reply.error(error.errno()),
        }
    }

    fn destroy(&mut self) {
        self.viewport.destroy();
    }
}

/// Mount `viewport` at `mountpoint` and serve requests until the kernel
/// unmounts it. The session loop is single-threaded; the viewport's own
/// lock keeps it correct either way.
pub fn serve(viewport: Arc<Viewport>, mountpoint: &Path, bucket: &str) -> io::Result<()> {
    let options = [
        MountOption::RO,
        MountOption::FSName(format!("vitrine:{}", bucket)),
        MountOption::DefaultPermissions,
    ];

    fuser::mount2(Mount::new(viewport), mountpoint, &options)
}
