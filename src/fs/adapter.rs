use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::clip::{clip_start_index, estimate, plan_read, ClipLayout, PathCodec, TimeWindow};
use crate::config::MountConfig;
use crate::error::{ClipError, Result};
use crate::probe::MetadataProbe;

use super::passthrough::{DirEntry, FsStats, PassthroughDelegate, RealFs, Stat};

/// Path-addressed filesystem serving trimmed views of audio files.
///
/// `getattr`, `open` and `read` understand clip paths; every other operation
/// strips the clip suffix and goes straight to the delegate.
pub struct ClipFs<D = RealFs> {
    codec: PathCodec,
    probe: Box<dyn MetadataProbe>,
    delegate: D,
}

impl ClipFs<RealFs> {
    pub fn new(config: &MountConfig, probe: Box<dyn MetadataProbe>) -> Self {
        Self::with_delegate(config, probe, RealFs)
    }
}

impl<D: PassthroughDelegate> ClipFs<D> {
    pub fn with_delegate(config: &MountConfig, probe: Box<dyn MetadataProbe>, delegate: D) -> Self {
        Self {
            codec: PathCodec::new(config),
            probe,
            delegate,
        }
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    /// Work out header, size and clip offset for `window` over `real`.
    pub fn layout(&self, real: &Path, window: &TimeWindow, total_size: u64) -> Result<ClipLayout> {
        let meta = self.probe.probe(real)?;
        let window = window.clamp(meta.duration_secs);
        if window.is_empty() {
            debug!("Window [{}] of {} is empty, serving the header only", window, real.display());
        }
        let est = estimate(&meta, total_size, window.duration());
        let clip_start = clip_start_index(total_size, est.header_size, window.start, est.duration_secs);

        let layout = ClipLayout::new(&est, clip_start).ok_or_else(|| {
            warn!(
                "Header size {} for {} is negative (bitrate {} kbps, {} channels)",
                est.header_size,
                real.display(),
                meta.bitrate_kbps,
                meta.channels
            );
            ClipError::HeaderUnderflow {
                path: real.to_path_buf(),
                header_size: est.header_size,
            }
        })?;

        debug!(
            "Clip {} [{}]: header={} virtual={} clip_start={}",
            real.display(),
            window,
            layout.header_size,
            layout.virtual_size,
            layout.clip_start
        );
        Ok(layout)
    }

    /// Attributes of the real file, with the size replaced for clip paths.
    ///
    /// Ownership, mode and timestamps always describe the real file.
    pub fn getattr(&self, path: &str) -> Result<Stat> {
        let (real, window) = self.codec.resolve(path)?;
        let mut stat = self.delegate.getattr(&real)?;

        if let Some(window) = window {
            stat.size = self.layout(&real, &window, stat.size)?.virtual_size;
        }
        Ok(stat)
    }

    /// Open the real file. The window is not attached to the handle.
    pub fn open(&self, path: &str, flags: i32) -> Result<u64> {
        let (real, _) = self.codec.resolve(path)?;
        self.delegate.open(&real, flags)
    }

    /// Read `length` bytes at virtual `offset` through the handle from `open`.
    pub fn read(&self, path: &str, length: usize, offset: u64, fh: u64) -> Result<Vec<u8>> {
        let (real, window) = self.codec.resolve(path)?;
        let Some(window) = window else {
            return self.delegate.read(fh, offset, length);
        };

        let total_size = self.delegate.getattr(&real)?.size;
        let layout = self.layout(&real, &window, total_size)?;
        let plan = plan_read(&layout, offset, length as u64);
        if plan.is_empty() {
            debug!("Read at {} is past the end of {}", offset, path);
            return Ok(Vec::new());
        }

        let mut data = Vec::with_capacity(plan.len() as usize);
        for segment in &plan.segments {
            let chunk = self
                .delegate
                .read(fh, segment.real_offset, segment.len as usize)?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    fn real(&self, path: &str) -> PathBuf {
        self.codec.strip(path)
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.delegate.readdir(&self.real(path))
    }

    pub fn readlink(&self, path: &str) -> Result<PathBuf> {
        self.delegate.readlink(&self.real(path))
    }

    pub fn mknod(&self, path: &str, mode: u32, rdev: u32) -> Result<()> {
        self.delegate.mknod(&self.real(path), mode, rdev)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.delegate.mkdir(&self.real(path), mode)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.delegate.rmdir(&self.real(path))
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.delegate.unlink(&self.real(path))
    }

    /// Create `link` pointing at `target`; the target is stored verbatim.
    pub fn symlink(&self, target: &Path, link: &str) -> Result<()> {
        self.delegate.symlink(target, &self.real(link))
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.delegate.rename(&self.real(from), &self.real(to))
    }

    pub fn link(&self, existing: &str, link: &str) -> Result<()> {
        self.delegate.link(&self.real(existing), &self.real(link))
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.delegate.chmod(&self.real(path), mode)
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.delegate.chown(&self.real(path), uid, gid)
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.delegate.truncate(&self.real(path), size)
    }

    pub fn utimens(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<()> {
        self.delegate.utimens(&self.real(path), atime, mtime)
    }

    pub fn access(&self, path: &str, mask: i32) -> Result<()> {
        self.delegate.access(&self.real(path), mask)
    }

    pub fn statfs(&self, path: &str) -> Result<FsStats> {
        self.delegate.statfs(&self.real(path))
    }

    pub fn create(&self, path: &str, mode: u32, flags: i32) -> Result<u64> {
        self.delegate.create(&self.real(path), mode, flags)
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize> {
        self.delegate.write(fh, offset, data)
    }

    pub fn flush(&self, fh: u64) -> Result<()> {
        self.delegate.flush(fh)
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> Result<()> {
        self.delegate.fsync(fh, datasync)
    }

    pub fn release(&self, fh: u64) -> Result<()> {
        self.delegate.release(fh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ContainerMetadata;

    struct FixedProbe(ContainerMetadata);

    impl MetadataProbe for FixedProbe {
        fn probe(&self, _path: &Path) -> Result<ContainerMetadata> {
            Ok(self.0)
        }
    }

    fn clip_fs(root: &Path, meta: ContainerMetadata) -> ClipFs {
        ClipFs::new(&MountConfig::new(root, '#'), Box::new(FixedProbe(meta)))
    }

    fn meta_10s() -> ContainerMetadata {
        // 10 s at 8 kbps mono: 10,000 data bytes.
        ContainerMetadata {
            duration_secs: 10.0,
            bitrate_kbps: 8.0,
            channels: 1,
        }
    }

    fn write_track(root: &Path) -> Vec<u8> {
        let bytes: Vec<u8> = (0..10_100u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(root.join("track.mp3"), &bytes).unwrap();
        bytes
    }

    #[test]
    fn test_getattr_plain_and_windowed() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        assert_eq!(fs.getattr("/track.mp3").unwrap().size, 10_100);
        assert_eq!(fs.getattr("/track.mp3#2-7").unwrap().size, 100 + 5_000);
        assert_eq!(fs.getattr("/track.mp3#0-10").unwrap().size, 10_100);
        assert_eq!(fs.getattr("/track.mp3#-3-30").unwrap().size, 10_100);
    }

    #[test]
    fn test_getattr_keeps_real_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        let plain = fs.getattr("/track.mp3").unwrap();
        let clip = fs.getattr("/track.mp3#2-7").unwrap();
        assert_eq!(clip.mtime, plain.mtime);
        assert_eq!(clip.perm, plain.perm);
        assert_eq!(clip.uid, plain.uid);
        assert_eq!(clip.ino, plain.ino);
    }

    #[test]
    fn test_read_whole_clip() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        let fh = fs.open("/track.mp3#2-7", libc::O_RDONLY).unwrap();
        let data = fs.read("/track.mp3#2-7", 5_100, 0, fh).unwrap();
        fs.release(fh).unwrap();

        assert_eq!(data.len(), 5_100);
        assert_eq!(&data[..100], &bytes[..100]);
        // Clip starts 2 s = 2,000 bytes into the data region.
        assert_eq!(&data[100..], &bytes[2_100..7_100]);
    }

    #[test]
    fn test_read_past_clip_end_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        let fh = fs.open("/track.mp3#2-7", libc::O_RDONLY).unwrap();
        assert!(fs.read("/track.mp3#2-7", 4_096, 5_100, fh).unwrap().is_empty());
        assert_eq!(fs.read("/track.mp3#2-7", 4_096, 5_000, fh).unwrap().len(), 100);
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_read_plain_path_is_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        let fh = fs.open("/track.mp3", libc::O_RDONLY).unwrap();
        assert_eq!(fs.read("/track.mp3", 50, 300, fh).unwrap(), &bytes[300..350]);
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_degenerate_window_is_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        assert_eq!(fs.getattr("/track.mp3#7-2").unwrap().size, 100);

        let fh = fs.open("/track.mp3#7-2", libc::O_RDONLY).unwrap();
        let data = fs.read("/track.mp3#7-2", 4_096, 0, fh).unwrap();
        fs.release(fh).unwrap();
        assert_eq!(data, &bytes[..100]);
    }

    #[test]
    fn test_negative_header_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(
            dir.path(),
            ContainerMetadata {
                bitrate_kbps: 16.0,
                ..meta_10s()
            },
        );

        let err = fs.getattr("/track.mp3#1-2").unwrap_err();
        assert!(matches!(err, ClipError::HeaderUnderflow { header_size: -9_900, .. }));
        // Plain paths never consult the size model.
        assert!(fs.getattr("/track.mp3").is_ok());
    }

    #[test]
    fn test_bad_clip_syntax_is_einval() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        let err = fs.getattr("/track.mp3#1-2#3-4").unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        let err = fs.open("/track.mp3#one-two", libc::O_RDONLY).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn test_forwarded_ops_use_stripped_path() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        fs.rename("/track.mp3#1-2", "/moved.mp3").unwrap();
        assert!(dir.path().join("moved.mp3").exists());

        fs.chmod("/moved.mp3#0-1", 0o600).unwrap();
        assert_eq!(fs.getattr("/moved.mp3").unwrap().perm, 0o600);

        fs.unlink("/moved.mp3#bogus").unwrap();
        assert!(!dir.path().join("moved.mp3").exists());
    }

    #[test]
    fn test_readdir_lists_real_names() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path());
        let fs = clip_fs(dir.path(), meta_10s());

        let names: Vec<_> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("track.mp3")]);
    }
}
