//! Target buffer window from bitrate and playback rate.

use crate::options::LoaderOptions;

/// Backward and forward capacities for a loader's byte window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferWindow {
    pub backward: usize,
    pub forward: usize,
}

/// Size the window to hold `seconds_behind`/`seconds_ahead` of media.
///
/// `bitrate` is in bits per second; `0` means unknown. Negative playback
/// rates swap the two directions.
pub fn buffer_window(bitrate: u64, playback_rate: f64, options: &LoaderOptions) -> BufferWindow {
    let bitrate = if bitrate == 0 {
        options.default_bitrate
    } else {
        bitrate.min(options.max_bitrate)
    };

    let reverse = playback_rate < 0.0;
    let rate = if playback_rate.is_finite() {
        playback_rate.abs().clamp(1.0, options.max_playback_rate.max(1.0))
    } else {
        1.0
    };

    let bytes_per_second = (bitrate as f64 / 8.0) * rate;
    let clamp = |seconds: u32| -> usize {
        let bytes = (f64::from(seconds) * bytes_per_second) as usize;
        bytes.clamp(options.min_capacity, options.max_capacity)
    };

    let forward = clamp(options.seconds_ahead);
    let backward = clamp(options.seconds_behind);
    if reverse {
        BufferWindow {
            backward: forward,
            forward: backward,
        }
    } else {
        BufferWindow { backward, forward }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const MIB: usize = 1024 * 1024;

    #[rstest]
    #[case::unknown_bitrate(0, 1.0, 2 * MIB, 2 * MIB)]
    #[case::high_bitrate(64_000_000, 1.0, 16_000_000, 20 * MIB)]
    #[case::reverse(64_000_000, -1.0, 20 * MIB, 16_000_000)]
    #[case::paused_counts_as_one(0, 0.0, 2 * MIB, 2 * MIB)]
    #[case::fast_forward(1_600_000, 4.0, 2 * MIB, 8_000_000)]
    #[case::rate_clamped(1_600_000, 100.0, 10_000_000, 20 * MIB)]
    #[case::bitrate_clamped(u64::MAX, 1.0, 20 * MIB, 20 * MIB)]
    fn window_sizes(
        #[case] bitrate: u64,
        #[case] rate: f64,
        #[case] backward: usize,
        #[case] forward: usize,
    ) {
        let window = buffer_window(bitrate, rate, &LoaderOptions::default());
        assert_eq!(window, BufferWindow { backward, forward });
    }
}
