use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::MountConfig;
use crate::error::{ClipError, Result};

use super::TimeWindow;

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?(?:\d+\.?\d*|\.\d+))-([+-]?(?:\d+\.?\d*|\.\d+))$")
        .expect("Invalid range regex")
});

/// A parsed virtual path: the real file relative to the root plus an optional
/// window.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualPath {
    pub relative: String,
    pub window: Option<TimeWindow>,
}

/// Parses virtual paths against a fixed root and delimiter.
#[derive(Debug, Clone)]
pub struct PathCodec {
    root: PathBuf,
    delimiter: char,
}

impl PathCodec {
    pub fn new(config: &MountConfig) -> Self {
        Self {
            root: config.root.clone(),
            delimiter: config.delimiter,
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Split `path` into its relative part and window.
    pub fn parse(&self, path: &str) -> Result<VirtualPath> {
        let partial = path.strip_prefix('/').unwrap_or(path);

        let mut parts = partial.split(self.delimiter);
        let relative = parts.next().unwrap_or_default();
        let range = parts.next();
        if parts.next().is_some() {
            return Err(ClipError::MultipleDelimiters {
                path: path.to_string(),
            });
        }

        let window = range.map(parse_range).transpose()?;

        Ok(VirtualPath {
            relative: relative.to_string(),
            window,
        })
    }

    /// Parse `path` and join it onto the root.
    pub fn resolve(&self, path: &str) -> Result<(PathBuf, Option<TimeWindow>)> {
        let vpath = self.parse(path)?;
        Ok((self.join(&vpath.relative), vpath.window))
    }

    /// Real path for operations that ignore the window.
    ///
    /// Everything from the first delimiter on is dropped without being
    /// validated, so renames and deletes of clip names hit the real file.
    pub fn strip(&self, path: &str) -> PathBuf {
        let partial = path.strip_prefix('/').unwrap_or(path);
        let relative = partial.split(self.delimiter).next().unwrap_or_default();
        self.join(relative)
    }

    fn join(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

fn parse_range(spec: &str) -> Result<TimeWindow> {
    let malformed = || ClipError::MalformedRange {
        spec: spec.to_string(),
    };

    let caps = RANGE_RE.captures(spec).ok_or_else(malformed)?;
    let start: f64 = caps[1].parse().map_err(|_| malformed())?;
    let end: f64 = caps[2].parse().map_err(|_| malformed())?;

    Ok(TimeWindow::new(start, end))
}
