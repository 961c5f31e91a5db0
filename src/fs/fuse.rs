//! `fuser::Filesystem` implementation.
//!
//! The kernel addresses files by inode while [`ClipFs`] works on paths, so
//! this layer keeps an inode ↔ virtual path table. Each virtual path gets its
//! own inode: `track.mp3` and `track.mp3#10-20` share a real file but report
//! different sizes and must not share kernel attribute or page caches.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow, FUSE_ROOT_ID,
};
use tracing::{debug, info, warn};

use crate::error::ClipError;

use super::adapter::ClipFs;
use super::passthrough::{FileKind, PassthroughDelegate, RealFs, Stat};

impl From<FileKind> for FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
            FileKind::Symlink => FileType::Symlink,
            FileKind::NamedPipe => FileType::NamedPipe,
            FileKind::CharDevice => FileType::CharDevice,
            FileKind::BlockDevice => FileType::BlockDevice,
            FileKind::Socket => FileType::Socket,
        }
    }
}

fn to_file_attr(ino: u64, stat: &Stat) -> FileAttr {
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: UNIX_EPOCH,
        kind: stat.kind.into(),
        perm: stat.perm,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: stat.rdev,
        blksize: stat.blksize,
        flags: 0,
    }
}

fn resolve_time(time: Option<TimeOrNow>) -> Option<SystemTime> {
    time.map(|t| match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    })
}

/// Bidirectional map between inode numbers and virtual paths.
#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: FUSE_ROOT_ID + 1,
        };
        table.paths.insert(FUSE_ROOT_ID, "/".to_string());
        table.inodes.insert("/".to_string(), FUSE_ROOT_ID);
        table
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent = self.path(parent)?;
        let name = name.to_str()?;
        if parent == "/" {
            Some(format!("/{}", name))
        } else {
            Some(format!("{}/{}", parent, name))
        }
    }

    /// Inode for `path`, allocating one on first sight.
    pub fn intern(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    pub fn remove(&mut self, path: &str) {
        if let Some(ino) = self.inodes.remove(path) {
            self.paths.remove(&ino);
        }
    }

    pub fn forget(&mut self, ino: u64) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        if let Some(path) = self.paths.remove(&ino) {
            self.inodes.remove(&path);
        }
    }

    /// Re-key `from` and everything below it to `to`.
    pub fn rename(&mut self, from: &str, to: &str) {
        self.remove(to);
        let prefix = format!("{}/", from);
        let moved: Vec<(u64, String)> = self
            .paths
            .iter()
            .filter(|(_, p)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(&ino, p)| (ino, format!("{}{}", to, &p[from.len()..])))
            .collect();

        for (ino, new_path) in moved {
            if let Some(old) = self.paths.insert(ino, new_path.clone()) {
                self.inodes.remove(&old);
            }
            self.inodes.insert(new_path, ino);
        }
    }

    /// Number of paths currently known, the root included.
    pub fn known(&self) -> usize {
        self.paths.len()
    }
}

/// FUSE session state: the clip filesystem plus the inode table.
pub struct ClipFuse<D = RealFs> {
    fs: ClipFs<D>,
    inodes: InodeTable,
    ttl: Duration,
}

impl<D: PassthroughDelegate> ClipFuse<D> {
    pub fn new(fs: ClipFs<D>, ttl: Duration) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            ttl,
        }
    }

    fn report(op: &str, path: &str, err: &ClipError) -> i32 {
        let errno = err.errno();
        match err {
            ClipError::Probe { .. } | ClipError::HeaderUnderflow { .. } => {
                warn!("{} {}: {}", op, path, err)
            }
            _ => debug!("{} {}: {}", op, path, err),
        }
        errno
    }

    /// Stat `path`, register it and reply with a directory entry.
    fn reply_entry(&mut self, op: &str, path: &str, reply: ReplyEntry) {
        match self.fs.getattr(path) {
            Ok(stat) => {
                let ino = self.inodes.intern(path);
                reply.entry(&self.ttl, &to_file_attr(ino, &stat), 0);
            }
            Err(e) => reply.error(Self::report(op, path, &e)),
        }
    }
}

/// Resolve an inode or reply ENOENT and return from the handler.
macro_rules! path_or_enoent {
    ($self:ident, $ino:expr, $reply:ident) => {
        match $self.inodes.path($ino) {
            Some(p) => p.to_string(),
            None => {
                $reply.error(libc::ENOENT);
                return;
            }
        }
    };
}

/// Resolve a child name or reply with the right errno and return.
macro_rules! child_or_error {
    ($self:ident, $parent:expr, $name:expr, $reply:ident) => {
        match $self.inodes.child_path($parent, $name) {
            Some(p) => p,
            None if $self.inodes.path($parent).is_none() => {
                $reply.error(libc::ENOENT);
                return;
            }
            None => {
                $reply.error(libc::EINVAL);
                return;
            }
        }
    };
}

impl<D: PassthroughDelegate> Filesystem for ClipFuse<D> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        info!(
            "clipfs ready (delimiter '{}')",
            self.fs.codec().delimiter()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!("clipfs unmounted ({} inodes known)", self.inodes.known());
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = child_or_error!(self, parent, name, reply);
        self.reply_entry("lookup", &path, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        self.inodes.forget(ino);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = path_or_enoent!(self, ino, reply);
        match self.fs.getattr(&path) {
            Ok(stat) => reply.attr(&self.ttl, &to_file_attr(ino, &stat)),
            Err(e) => reply.error(Self::report("getattr", &path, &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = path_or_enoent!(self, ino, reply);

        let result = (|| {
            if let Some(mode) = mode {
                self.fs.chmod(&path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                self.fs.chown(&path, uid, gid)?;
            }
            if let Some(size) = size {
                self.fs.truncate(&path, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                self.fs
                    .utimens(&path, resolve_time(atime), resolve_time(mtime))?;
            }
            self.fs.getattr(&path)
        })();

        match result {
            Ok(stat) => reply.attr(&self.ttl, &to_file_attr(ino, &stat)),
            Err(e) => reply.error(Self::report("setattr", &path, &e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = path_or_enoent!(self, ino, reply);
        match self.fs.readlink(&path) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(Self::report("readlink", &path, &e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = child_or_error!(self, parent, name, reply);
        match self.fs.mknod(&path, mode, rdev) {
            Ok(()) => self.reply_entry("mknod", &path, reply),
            Err(e) => reply.error(Self::report("mknod", &path, &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = child_or_error!(self, parent, name, reply);
        match self.fs.mkdir(&path, mode) {
            Ok(()) => self.reply_entry("mkdir", &path, reply),
            Err(e) => reply.error(Self::report("mkdir", &path, &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = child_or_error!(self, parent, name, reply);
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::report("unlink", &path, &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = child_or_error!(self, parent, name, reply);
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::report("rmdir", &path, &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = child_or_error!(self, parent, link_name, reply);
        match self.fs.symlink(target, &path) {
            Ok(()) => self.reply_entry("symlink", &path, reply),
            Err(e) => reply.error(Self::report("symlink", &path, &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let from = child_or_error!(self, parent, name, reply);
        let to = child_or_error!(self, newparent, newname, reply);
        match self.fs.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(Self::report("rename", &from, &e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let existing = path_or_enoent!(self, ino, reply);
        let path = child_or_error!(self, newparent, newname, reply);
        match self.fs.link(&existing, &path) {
            Ok(()) => self.reply_entry("link", &path, reply),
            Err(e) => reply.error(Self::report("link", &path, &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = path_or_enoent!(self, ino, reply);
        match self.fs.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(Self::report("open", &path, &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = path_or_enoent!(self, ino, reply);
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.read(&path, size as usize, offset as u64, fh) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::report("read", &path, &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.write(fh, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(Self::report("write", &format!("inode {}", ino), &e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.fs.flush(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::report("flush", &format!("inode {}", ino), &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::report("release", &format!("inode {}", ino), &e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.fs.fsync(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::report("fsync", &format!("inode {}", ino), &e)),
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
        let path = path_or_enoent!(self, ino, reply);
        let listing = match self.fs.readdir(&path) {
            Ok(l) => l,
            Err(e) => {
                reply.error(Self::report("readdir", &path, &e));
                return;
            }
        };

        let mut entries: Vec<(u64, FileType, std::ffi::OsString)> = vec![
            (ino, FileType::Directory, ".".into()),
            (ino, FileType::Directory, "..".into()),
        ];
        entries.extend(
            listing
                .into_iter()
                .map(|e| (e.ino, FileType::from(e.kind), e.name)),
        );

        for (i, (e_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*e_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = path_or_enoent!(self, ino, reply);
        match self.fs.statfs(&path) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen, st.frsize,
            ),
            Err(e) => reply.error(Self::report("statfs", &path, &e)),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = path_or_enoent!(self, ino, reply);
        match self.fs.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::report("access", &path, &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = child_or_error!(self, parent, name, reply);
        let fh = match self.fs.create(&path, mode, flags) {
            Ok(fh) => fh,
            Err(e) => {
                reply.error(Self::report("create", &path, &e));
                return;
            }
        };
        match self.fs.getattr(&path) {
            Ok(stat) => {
                let ino = self.inodes.intern(&path);
                reply.created(&self.ttl, &to_file_attr(ino, &stat), 0, fh, 0);
            }
            Err(e) => {
                let _ = self.fs.release(fh);
                reply.error(Self::report("create", &path, &e));
            }
        }
    }
}
