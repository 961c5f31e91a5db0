//! Virtual-to-real offset translation.
//!
//! A clip is the real file's header followed by a slice of its data region
//! starting `clip_start` bytes into that region. For any virtual offset `v`
//! past the header the real offset is `v + clip_start`.
//!
//! The header is only emitted for a read at virtual offset 0, and a read at
//! any other offset is assumed to continue the data region. Readers that seek
//! straight into the first `header_size` bytes get data bytes instead of
//! header bytes; sequential playback from offset 0 is the supported pattern.

use super::SizeEstimate;

/// Byte offset into the data region where the clip begins.
pub fn clip_start_index(total_size: u64, header_size: i64, start_secs: f64, duration_secs: f64) -> i64 {
    let data = total_size as i64 - header_size;
    (start_secs / duration_secs * data as f64).floor() as i64
}

/// Everything needed to map reads on one virtual clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipLayout {
    pub header_size: u64,
    pub virtual_size: u64,
    pub clip_start: u64,
}

impl ClipLayout {
    /// Build a layout from an estimate whose header size is non-negative.
    pub fn new(estimate: &SizeEstimate, clip_start: i64) -> Option<Self> {
        if estimate.header_size < 0 {
            return None;
        }
        Some(Self {
            header_size: estimate.header_size as u64,
            virtual_size: estimate.virtual_size.max(estimate.header_size) as u64,
            clip_start: clip_start.max(0) as u64,
        })
    }
}

/// One contiguous read against the real file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub real_offset: u64,
    pub len: u64,
}

/// Real-file reads that together answer one virtual read, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPlan {
    pub segments: Vec<Segment>,
}

impl ReadPlan {
    pub fn len(&self) -> u64 {
        self.segments.iter().map(|s| s.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Plan the real reads for `length` bytes at virtual `offset`.
pub fn plan_read(layout: &ClipLayout, offset: u64, length: u64) -> ReadPlan {
    let mut plan = ReadPlan::default();
    if offset >= layout.virtual_size {
        return plan;
    }

    let mut budget = length.min(layout.virtual_size - offset);
    let mut working = offset;

    if offset == 0 {
        let header = layout.header_size.min(budget);
        if header > 0 {
            plan.segments.push(Segment {
                real_offset: 0,
                len: header,
            });
        }
        budget -= header;
        working = layout.header_size;
    }

    if budget > 0 {
        plan.segments.push(Segment {
            real_offset: working + layout.clip_start,
            len: budget,
        });
    }

    plan
}
