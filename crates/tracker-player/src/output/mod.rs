//! Audio output seam.
//!
//! An [`AudioOutput`] pulls interleaved stereo `i16` chunks from an attached
//! [`PullSource`] at its own pace and reports how much of that audio the
//! listener has not heard yet.

mod buffer;
pub mod device;
mod stream;

use std::sync::MutexGuard;

use crate::engine::PullSource;

pub use buffer::{SampleBuffer, calc_max_buffered_samples};
pub use stream::CpalOutput;

/// Layout of the PCM the output consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl StreamFormat {
    /// Interleaved signed 16-bit stereo.
    pub fn stereo_i16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
            bytes_per_sample: 2,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bytes_per_sample)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    pub fn bytes_to_seconds(&self, bytes: usize) -> f64 {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return 0.0;
        }
        bytes as f64 / per_second as f64
    }
}

/// A device (or stand-in) that plays what it pulls.
///
/// `reset` discards everything buffered and leaves the output paused; `play`
/// resumes pulling. While a caller holds the guard from [`hold_feed`], no
/// pull is in flight and none will start.
///
/// [`hold_feed`]: AudioOutput::hold_feed
pub trait AudioOutput: Send + Sync {
    fn format(&self) -> StreamFormat;

    /// Replace the pull source. Clears any end-of-stream state.
    fn attach(&self, source: Box<dyn PullSource>);

    fn play(&self);

    fn pause(&self);

    fn reset(&self);

    fn close(&self);

    /// Bytes handed over but not yet audible.
    fn unplayed_bytes(&self) -> usize;

    fn hold_feed(&self) -> MutexGuard<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_i16_layout() {
        let fmt = StreamFormat::stereo_i16(48_000);
        assert_eq!(fmt.bytes_per_frame(), 4);
        assert_eq!(fmt.bytes_per_second(), 192_000);
        assert!((fmt.bytes_to_seconds(96_000) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_converts_to_zero_seconds() {
        let fmt = StreamFormat::stereo_i16(0);
        assert_eq!(fmt.bytes_to_seconds(4096), 0.0);
    }
}
