pub mod cache;
pub mod reader;

pub use cache::CachedProbe;
pub use reader::LoftyProbe;

use std::path::Path;

use crate::error::Result;

/// Container-level audio properties used by the size model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerMetadata {
    pub duration_secs: f64,
    pub bitrate_kbps: f64,
    pub channels: u32,
}

/// Reads audio properties from a real file.
///
/// Implementations must fail rather than guess: a missing bitrate or channel
/// count, or a non-positive duration, is a probe error.
pub trait MetadataProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ContainerMetadata>;
}

/// Pick the probe for a mount: plain lofty, or lofty behind a cache.
pub fn default_probe(cache_metadata: bool) -> Box<dyn MetadataProbe> {
    if cache_metadata {
        Box::new(CachedProbe::new(LoftyProbe))
    } else {
        Box::new(LoftyProbe)
    }
}
