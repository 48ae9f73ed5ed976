#![forbid(unsafe_code)]

const MIB: usize = 1024 * 1024;

/// Tuning knobs of a [`RangeLoader`](crate::RangeLoader).
///
/// Defaults match the values the loader has always shipped with; changing
/// them does not change the algorithms.
#[derive(Clone, Debug, PartialEq)]
pub struct LoaderOptions {
    /// How far past the buffered data a read may start and still wait for
    /// the active transfer instead of missing.
    pub forward_wait_threshold: usize,
    /// Lower clamp for both window capacities.
    pub min_capacity: usize,
    /// Upper clamp for both window capacities; also the largest single read.
    pub max_capacity: usize,
    /// Seconds of media kept ahead of the cursor.
    pub seconds_ahead: u32,
    /// Seconds of media kept behind the cursor.
    pub seconds_behind: u32,
    /// Bitrate (bits/s) assumed when the caller knows none.
    pub default_bitrate: u64,
    /// Bitrates above this (bits/s) are clamped.
    pub max_bitrate: u64,
    /// Playback rates are clamped to `[1, max_playback_rate]` by magnitude.
    pub max_playback_rate: f64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            forward_wait_threshold: 2 * MIB,
            min_capacity: 2 * MIB,
            max_capacity: 20 * MIB,
            seconds_ahead: 10,
            seconds_behind: 2,
            default_bitrate: 200 * 1024 * 8,
            max_bitrate: 20 * 8 * MIB as u64,
            max_playback_rate: 25.0,
        }
    }
}

impl LoaderOptions {
    #[must_use]
    pub fn with_forward_wait_threshold(mut self, bytes: usize) -> Self {
        self.forward_wait_threshold = bytes;
        self
    }

    /// Set both capacity clamps.
    #[must_use]
    pub fn with_capacity_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_capacity = min;
        self.max_capacity = max.max(min);
        self
    }

    #[must_use]
    pub fn with_target_seconds(mut self, ahead: u32, behind: u32) -> Self {
        self.seconds_ahead = ahead;
        self.seconds_behind = behind;
        self
    }
}
