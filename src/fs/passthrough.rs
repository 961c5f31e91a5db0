//! Unmodified filesystem operations against the real tree.
//!
//! Handles are raw file descriptors. `open` and `create` hand ownership of the
//! descriptor to the caller and `release` takes it back and closes it; no
//! table of open files is kept.

use std::ffi::{CString, OsString};
use std::fs::{self, DirBuilder, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::mem::ManuallyDrop;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{
    DirBuilderExt, DirEntryExt, FileExt, FileTypeExt, MetadataExt, OpenOptionsExt,
    PermissionsExt,
};
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Kind of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

impl From<fs::FileType> for FileKind {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_fifo() {
            FileKind::NamedPipe
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::RegularFile
        }
    }
}

/// `lstat` result in a form independent of the FUSE binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl From<&Metadata> for Stat {
    fn from(meta: &Metadata) -> Self {
        Self {
            ino: meta.ino(),
            size: meta.size(),
            blocks: meta.blocks(),
            atime: system_time(meta.atime(), meta.atime_nsec()),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            kind: meta.file_type().into(),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        }
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::new(secs.unsigned_abs(), 0) + Duration::from_nanos(nsecs as u64)
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: OsString,
    pub kind: FileKind,
}

/// Filesystem statistics as reported by `statvfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// The full set of filesystem operations, on real paths and handles.
pub trait PassthroughDelegate: Send {
    fn getattr(&self, path: &Path) -> Result<Stat>;
    fn open(&self, path: &Path, flags: i32) -> Result<u64>;
    fn read(&self, fh: u64, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>>;
    fn readlink(&self, path: &Path) -> Result<PathBuf>;
    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> Result<()>;
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;
    fn rmdir(&self, path: &Path) -> Result<()>;
    fn unlink(&self, path: &Path) -> Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn link(&self, existing: &Path, link: &Path) -> Result<()>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
    fn truncate(&self, path: &Path, size: u64) -> Result<()>;
    fn utimens(&self, path: &Path, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()>;
    fn access(&self, path: &Path, mask: i32) -> Result<()>;
    fn statfs(&self, path: &Path) -> Result<FsStats>;
    fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<u64>;
    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize>;
    fn flush(&self, fh: u64) -> Result<()>;
    fn fsync(&self, fh: u64, datasync: bool) -> Result<()>;
    fn release(&self, fh: u64) -> Result<()>;
}

/// Delegate backed by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl RealFs {
    /// Run `f` on the file behind `fh` without taking ownership of it.
    fn with_file<T>(fh: u64, f: impl FnOnce(&File) -> io::Result<T>) -> Result<T> {
        // SAFETY: `fh` was produced by `into_raw_fd` in `open`/`create` and stays
        // open until `release`; ManuallyDrop keeps this borrow from closing it.
        let file = ManuallyDrop::new(unsafe { File::from_raw_fd(fh as RawFd) });
        Ok(f(&*file)?)
    }

    fn open_options(flags: i32) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => opts.write(true),
            libc::O_RDWR => opts.read(true).write(true),
            _ => opts.read(true),
        };
        opts.custom_flags(flags & !libc::O_ACCMODE);
        opts
    }
}

/// Read until `len` bytes are collected or the file ends.
pub fn read_full_at(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn check(rc: libc::c_int) -> Result<()> {
    if rc == -1 {
        Err(io::Error::last_os_error().into())
    } else {
        Ok(())
    }
}

fn timespec(time: Option<SystemTime>) -> libc::timespec {
    match time {
        Some(t) => {
            let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
            libc::timespec {
                tv_sec: since.as_secs() as libc::time_t,
                tv_nsec: since.subsec_nanos() as libc::c_long,
            }
        }
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
    }
}

impl PassthroughDelegate for RealFs {
    fn getattr(&self, path: &Path) -> Result<Stat> {
        let meta = fs::symlink_metadata(path)?;
        Ok(Stat::from(&meta))
    }

    fn open(&self, path: &Path, flags: i32) -> Result<u64> {
        let file = Self::open_options(flags).open(path)?;
        Ok(file.into_raw_fd() as u64)
    }

    fn read(&self, fh: u64, offset: u64, len: usize) -> Result<Vec<u8>> {
        Self::with_file(fh, |f| read_full_at(f, offset, len))
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                ino: entry.ino(),
                name: entry.file_name(),
                kind: entry.file_type()?.into(),
            });
        }
        Ok(entries)
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(path)?)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> Result<()> {
        let c = c_path(path)?;
        // SAFETY: `c` is a valid NUL-terminated path for the duration of the call.
        check(unsafe { libc::mknod(c.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        Ok(DirBuilder::new().mode(mode).create(path)?)
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir(path)?)
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path)?)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        Ok(std::os::unix::fs::symlink(target, link)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(fs::rename(from, to)?)
    }

    fn link(&self, existing: &Path, link: &Path) -> Result<()> {
        Ok(fs::hard_link(existing, link)?)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        Ok(fs::set_permissions(path, Permissions::from_mode(mode))?)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        Ok(std::os::unix::fs::chown(path, uid, gid)?)
    }

    fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        Ok(file.set_len(size)?)
    }

    fn utimens(&self, path: &Path, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()> {
        let c = c_path(path)?;
        let times = [timespec(atime), timespec(mtime)];
        // SAFETY: `c` and `times` outlive the call; utimensat reads exactly two entries.
        check(unsafe { libc::utimensat(libc::AT_FDCWD, c.as_ptr(), times.as_ptr(), 0) })
    }

    fn access(&self, path: &Path, mask: i32) -> Result<()> {
        let c = c_path(path)?;
        // SAFETY: `c` is a valid NUL-terminated path for the duration of the call.
        check(unsafe { libc::access(c.as_ptr(), mask) })
    }

    fn statfs(&self, path: &Path) -> Result<FsStats> {
        let c = c_path(path)?;
        // SAFETY: statvfs fully initialises the struct when it returns 0.
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        check(unsafe { libc::statvfs(c.as_ptr(), &mut st) })?;
        Ok(FsStats {
            blocks: st.f_blocks as u64,
            bfree: st.f_bfree as u64,
            bavail: st.f_bavail as u64,
            files: st.f_files as u64,
            ffree: st.f_ffree as u64,
            bsize: st.f_bsize as u32,
            namelen: st.f_namemax as u32,
            frsize: st.f_frsize as u32,
        })
    }

    fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<u64> {
        let mut opts = Self::open_options(flags);
        if flags & libc::O_ACCMODE == libc::O_RDONLY {
            opts.write(true);
        }
        let file = opts.create(true).mode(mode).open(path)?;
        Ok(file.into_raw_fd() as u64)
    }

    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize> {
        Self::with_file(fh, |f| f.write_all_at(data, offset).map(|_| data.len()))
    }

    fn flush(&self, fh: u64) -> Result<()> {
        Self::with_file(fh, |f| f.sync_all())
    }

    fn fsync(&self, fh: u64, datasync: bool) -> Result<()> {
        Self::with_file(fh, |f| if datasync { f.sync_data() } else { f.sync_all() })
    }

    fn release(&self, fh: u64) -> Result<()> {
        // SAFETY: ownership of the descriptor returns here; it is closed on drop.
        drop(unsafe { File::from_raw_fd(fh as RawFd) });
        Ok(())
    }
}
