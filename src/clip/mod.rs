//! Addressing and byte arithmetic for trimmed audio views.
//!
//! A virtual path such as `album/track.mp3#25-75` names the real file
//! `album/track.mp3` restricted to seconds 25..75. Nothing here touches the
//! filesystem: the codec turns paths into windows, the estimator turns
//! container metadata into sizes, and the mapper turns virtual byte ranges
//! into reads against the real file.

pub mod estimate;
pub mod mapper;
pub mod path;

pub use estimate::{data_size, estimate, SizeEstimate};
pub use mapper::{clip_start_index, plan_read, ClipLayout, ReadPlan, Segment};
pub use path::{PathCodec, VirtualPath};

/// A requested `(start, end)` range in seconds.
///
/// Values come straight from the path and may be negative or past the end of
/// the track until [`TimeWindow::clamp`] is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Clamp against the track duration so that `0 <= start <= end <= duration`.
    ///
    /// A window that ends before it starts collapses to an empty clip at
    /// `start`.
    pub fn clamp(&self, duration: f64) -> TimeWindow {
        let start = self.start.max(0.0).min(duration);
        let end = self.end.min(duration).max(start);
        TimeWindow { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_duration_is_identity() {
        let w = TimeWindow::new(25.0, 75.0).clamp(100.0);
        assert_eq!(w, TimeWindow::new(25.0, 75.0));
        assert_eq!(w.duration(), 50.0);
    }

    #[test]
    fn test_clamp_negative_start_and_long_end() {
        let w = TimeWindow::new(-5.0, 250.0).clamp(100.0);
        assert_eq!(w, TimeWindow::new(0.0, 100.0));
    }

    #[test]
    fn test_clamp_reversed_window_is_empty() {
        let w = TimeWindow::new(60.0, 10.0).clamp(100.0);
        assert!(w.is_empty());
        assert_eq!(w.start, 60.0);
        assert_eq!(w.duration(), 0.0);
    }

    #[test]
    fn test_clamp_window_past_end_is_empty() {
        let w = TimeWindow::new(150.0, 200.0).clamp(100.0);
        assert!(w.is_empty());
        assert_eq!(w, TimeWindow::new(100.0, 100.0));
    }
}
