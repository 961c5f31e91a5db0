use std::path::Path;

use fuser::{MountOption, Session, SessionUnmounter};
use tracing::info;

use crate::config::Config;
use crate::error::{ClipError, Result};

use super::fuse::ClipFuse;
use super::passthrough::PassthroughDelegate;

/// Refuse to shadow existing content under the mount point.
pub fn ensure_empty_mountpoint(mountpoint: &Path) -> Result<()> {
    let mut entries = std::fs::read_dir(mountpoint)?;
    if entries.next().is_some() {
        return Err(ClipError::MountpointNotEmpty(mountpoint.to_path_buf()));
    }
    Ok(())
}

/// Options for a private mount: only the mounting user may access it.
pub fn mount_options(config: &Config) -> Vec<MountOption> {
    vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype("clipfs".to_string()),
        MountOption::NoDev,
        MountOption::NoSuid,
    ]
}

/// Mount and serve on the calling thread until the filesystem is unmounted.
///
/// `on_mounted` receives a handle that unmounts the session from another
/// thread (a signal handler, typically). Returns once the kernel closes the
/// connection, whether through that handle or an external `fusermount -u`.
///
/// # Arguments
/// * `fs` - Filesystem to serve
/// * `mountpoint` - Empty directory to mount on
/// * `config` - Settings supplying the mount options
/// * `on_mounted` - Called with the unmount handle before serving starts
pub fn serve<D, F>(fs: ClipFuse<D>, mountpoint: &Path, config: &Config, on_mounted: F) -> Result<()>
where
    D: PassthroughDelegate,
    F: FnOnce(SessionUnmounter) -> Result<()>,
{
    ensure_empty_mountpoint(mountpoint)?;
    let mut session = Session::new(fs, mountpoint, &mount_options(config))
        .map_err(|e| ClipError::Mount(format!("{}: {e}", mountpoint.display())))?;
    info!("Mounted at {}", mountpoint.display());

    on_mounted(session.unmount_callable())?;

    session
        .run()
        .map_err(|e| ClipError::Mount(format!("session loop failed: {e}")))?;
    info!("Unmounted {}", mountpoint.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use crate::fs::ClipFs;
    use crate::probe::LoftyProbe;
    use std::time::Duration;

    #[test]
    fn test_empty_mountpoint_accepted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_empty_mountpoint(dir.path()).is_ok());
    }

    #[test]
    fn test_non_empty_mountpoint_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing"), b"").unwrap();

        let err = ensure_empty_mountpoint(dir.path()).unwrap_err();
        assert!(matches!(err, ClipError::MountpointNotEmpty(_)));
    }

    #[test]
    fn test_missing_mountpoint_is_io_error() {
        let err = ensure_empty_mountpoint(Path::new("/nonexistent/clipfs/mnt")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn test_serve_refuses_non_empty_mountpoint_before_mounting() {
        let root = tempfile::tempdir().unwrap();
        let mnt = tempfile::tempdir().unwrap();
        std::fs::write(mnt.path().join("existing"), b"").unwrap();

        let fs = ClipFs::new(&MountConfig::new(root.path(), '#'), Box::new(LoftyProbe));
        let fuse = ClipFuse::new(fs, Duration::from_secs(1));
        let mut handed_out = false;

        let err = serve(fuse, mnt.path(), &Config::default(), |_| {
            handed_out = true;
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, ClipError::MountpointNotEmpty(_)));
        assert!(!handed_out);
    }

    #[test]
    fn test_mount_options_are_private() {
        let options = mount_options(&Config::default());
        assert!(options.contains(&MountOption::FSName("clipfs".to_string())));
        assert!(!options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::AllowRoot));
    }
}
