use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Path {path:?} contains the clip delimiter more than once")]
    MultipleDelimiters { path: String },

    #[error("Malformed clip range '{spec}', expected <start>-<end> in seconds")]
    MalformedRange { spec: String },

    #[error("Metadata probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Negative header size {header_size} for {path}; bitrate model does not fit this container")]
    HeaderUnderflow { path: PathBuf, header_size: i64 },

    #[error("Mount point is not empty: {0}")]
    MountpointNotEmpty(PathBuf),

    #[error("Mount failed: {0}")]
    Mount(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClipError {
    /// Errno reported to the kernel when this error ends a filesystem request.
    pub fn errno(&self) -> i32 {
        match self {
            ClipError::MultipleDelimiters { .. } | ClipError::MalformedRange { .. } => {
                libc::EINVAL
            }
            ClipError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }

    pub fn probe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ClipError::Probe {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_syntax_errors_map_to_einval() {
        let err = ClipError::MultipleDelimiters {
            path: "a#1-2#3".to_string(),
        };
        assert_eq!(err.errno(), libc::EINVAL);

        let err = ClipError::MalformedRange {
            spec: "abc".to_string(),
        };
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn test_io_errors_keep_os_code() {
        let err = ClipError::from(std::io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.errno(), libc::ENOENT);

        let err = ClipError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_probe_and_underflow_map_to_eio() {
        assert_eq!(ClipError::probe("/x.mp3", "bad header").errno(), libc::EIO);

        let err = ClipError::HeaderUnderflow {
            path: PathBuf::from("/x.mp3"),
            header_size: -12,
        };
        assert_eq!(err.errno(), libc::EIO);
        assert!(err.to_string().contains("-12"));
    }
}
