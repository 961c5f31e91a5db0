use std::path::Path;

use lofty::file::{AudioFile, FileType, TaggedFileExt};
use lofty::properties::FileProperties;
use tracing::debug;

use crate::error::{ClipError, Result};

use super::{ContainerMetadata, MetadataProbe};

/// Probe backed by lofty's container parsers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyProbe;

impl MetadataProbe for LoftyProbe {
    fn probe(&self, path: &Path) -> Result<ContainerMetadata> {
        let tagged = lofty::read_from_path(path).map_err(|e| ClipError::probe(path, e.to_string()))?;
        let props = tagged.properties();

        let duration_secs = props.duration().as_secs_f64();
        if duration_secs <= 0.0 {
            return Err(ClipError::probe(path, "container reports zero duration"));
        }

        let channels = props
            .channels()
            .ok_or_else(|| ClipError::probe(path, "container reports no channel count"))?;

        let bitrate_kbps = pcm_bitrate_kbps(tagged.file_type(), props)
            .or_else(|| props.audio_bitrate().map(f64::from))
            .or_else(|| props.overall_bitrate().map(f64::from))
            .ok_or_else(|| ClipError::probe(path, "container reports no bitrate"))?;

        let meta = ContainerMetadata {
            duration_secs,
            bitrate_kbps,
            channels: channels as u32,
        };
        debug!("Probed {}: {:?}", path.display(), meta);
        Ok(meta)
    }
}

/// Exact bitrate of uncompressed containers.
///
/// lofty reports bitrates as whole kbps, which drops the fraction of rates
/// like 44.1 kHz 16-bit (705.6 kbps) and shifts every clip offset.
fn pcm_bitrate_kbps(file_type: FileType, props: &FileProperties) -> Option<f64> {
    if !matches!(file_type, FileType::Wav | FileType::Aiff) {
        return None;
    }
    let sample_rate = props.sample_rate()?;
    let bit_depth = props.bit_depth()?;
    let channels = props.channels()?;
    if sample_rate == 0 || bit_depth == 0 || channels == 0 {
        return None;
    }
    Some(f64::from(sample_rate) * f64::from(bit_depth) * f64::from(channels) / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_probe_error() {
        let err = LoftyProbe
            .probe(Path::new("/nonexistent/clipfs/track.mp3"))
            .unwrap_err();
        assert!(matches!(err, ClipError::Probe { .. }));
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_non_audio_file_is_probe_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp3");
        std::fs::write(&path, b"definitely not an mp3 frame").unwrap();

        let err = LoftyProbe.probe(&path).unwrap_err();
        assert!(matches!(err, ClipError::Probe { .. }));
    }
}
