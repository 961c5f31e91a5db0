pub mod clip;
pub mod config;
pub mod error;
pub mod fs;
pub mod probe;

pub use clip::{PathCodec, SizeEstimate, TimeWindow, VirtualPath};
pub use config::{Config, MountConfig};
pub use error::{ClipError, Result};
pub use fs::{ClipFs, ClipFuse, PassthroughDelegate, RealFs};
pub use probe::{ContainerMetadata, LoftyProbe, MetadataProbe};
