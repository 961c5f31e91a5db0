pub mod adapter;
pub mod fuse;
pub mod mount;
pub mod passthrough;

pub use adapter::ClipFs;
pub use fuse::{ClipFuse, InodeTable};
pub use mount::{ensure_empty_mountpoint, mount_options, serve};
pub use passthrough::{DirEntry, FileKind, FsStats, PassthroughDelegate, RealFs, Stat};
