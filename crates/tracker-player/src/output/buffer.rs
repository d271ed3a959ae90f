//! Bounded sample buffer between the feeder thread and the device callback.
//!
//! Samples are interleaved (`frame0[L], frame0[R], frame1[L], ...`). The
//! callback side never waits; the feeder side can wait for room.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const FALLBACK_BUFFER_MS: u32 = 60;

/// Capacity in samples for `buffer_ms` of audio at `rate_hz`.
///
/// A zero duration falls back to 60 ms.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_ms: u32) -> usize {
    let ms = if buffer_ms == 0 {
        FALLBACK_BUFFER_MS
    } else {
        buffer_ms
    };
    let frames = (u64::from(rate_hz) * u64::from(ms)).div_ceil(1000) as usize;
    frames.saturating_mul(channels)
}

pub struct SampleBuffer {
    channels: usize,
    queue: Mutex<VecDeque<i16>>,
    room: Condvar,
    max_samples: usize,
}

impl SampleBuffer {
    pub fn new(channels: usize, max_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            queue: Mutex::new(VecDeque::with_capacity(max_samples)),
            room: Condvar::new(),
            max_samples,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity_samples(&self) -> usize {
        self.max_samples
    }

    pub fn len_samples(&self) -> usize {
        self.lock().len()
    }

    pub fn len_frames(&self) -> usize {
        self.len_samples() / self.channels
    }

    /// Append as much of `samples` as fits. Returns how many were taken.
    pub fn push(&self, samples: &[i16]) -> usize {
        let mut q = self.lock();
        let n = samples.len().min(self.max_samples.saturating_sub(q.len()));
        q.extend(&samples[..n]);
        n
    }

    /// Move whole frames into `out` without waiting. Returns samples written.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut q = self.lock();
        let want = out.len().min(q.len());
        let n = want - want % self.channels;
        for (dst, src) in out.iter_mut().zip(q.drain(..n)) {
            *dst = src;
        }
        drop(q);
        if n > 0 {
            self.room.notify_all();
        }
        n
    }

    /// Discard everything buffered. Returns how many samples were dropped.
    pub fn clear(&self) -> usize {
        let mut q = self.lock();
        let dropped = q.len();
        q.clear();
        drop(q);
        self.room.notify_all();
        dropped
    }

    /// Wait until `samples` would fit, up to `timeout`.
    pub fn wait_for_room(&self, samples: usize, timeout: Duration) -> bool {
        let q = self.lock();
        let (q, _timeout) = self
            .room
            .wait_timeout_while(q, timeout, |q| {
                self.max_samples.saturating_sub(q.len()) < samples
            })
            .unwrap_or_else(PoisonError::into_inner);
        self.max_samples.saturating_sub(q.len()) >= samples
    }
}
