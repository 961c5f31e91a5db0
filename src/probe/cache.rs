use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::debug;

use crate::error::Result;

use super::{ContainerMetadata, MetadataProbe};

/// File identity a cached entry is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    mtime: Option<SystemTime>,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            mtime: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Caches probe results per real path until the file's mtime or length
/// changes. Entries for paths that can no longer be stat'ed are dropped.
pub struct CachedProbe<P> {
    inner: P,
    entries: Mutex<HashMap<PathBuf, (Stamp, ContainerMetadata)>>,
}

impl<P: MetadataProbe> CachedProbe<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn evict(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(path).is_some() {
                debug!("Dropped cached metadata for {}", path.display());
            }
        }
    }
}

impl<P: MetadataProbe> MetadataProbe for CachedProbe<P> {
    fn probe(&self, path: &Path) -> Result<ContainerMetadata> {
        let stamp = match Stamp::of(path) {
            Ok(stamp) => stamp,
            Err(e) => {
                self.evict(path);
                return Err(e);
            }
        };

        if let Ok(entries) = self.entries.lock() {
            if let Some((cached, meta)) = entries.get(path) {
                if *cached == stamp {
                    return Ok(*meta);
                }
            }
        }

        let meta = self.inner.probe(path)?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.to_path_buf(), (stamp, meta));
            debug!("Caching metadata for {} ({} entries)", path.display(), entries.len());
        }
        Ok(meta)
    }
}
