//! Pull-driven render loop.
//!
//! The output asks for one chunk at a time. Each pull logs where the decoder
//! is about to render from, renders, then advances the frame counter the
//! sync log is keyed on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::module::Module;
use crate::sync::SyncClock;

/// Result of one pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pull {
    /// `frames` interleaved stereo frames were written to the front of the buffer.
    Data { frames: usize },
    /// The song finished; nothing was written.
    EndOfStream,
    /// Shutdown was requested before rendering started.
    Cancelled,
}

/// Producer side of an [`crate::output::AudioOutput`].
pub trait PullSource: Send {
    /// Fill `out` with interleaved stereo samples.
    fn pull(&mut self, out: &mut [i16]) -> Pull;
}

/// Shared shutdown flag, checked before every chunk.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Renders a [`Module`] into the output and keeps the [`SyncClock`] current.
pub struct PlaybackEngine {
    module: Arc<Module>,
    clock: Arc<Mutex<SyncClock>>,
    sample_rate: u32,
    cancel: CancelToken,
}

impl PlaybackEngine {
    pub fn new(
        module: Arc<Module>,
        clock: Arc<Mutex<SyncClock>>,
        sample_rate: u32,
        cancel: CancelToken,
    ) -> Self {
        Self {
            module,
            clock,
            sample_rate,
            cancel,
        }
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, SyncClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PullSource for PlaybackEngine {
    fn pull(&mut self, out: &mut [i16]) -> Pull {
        if self.cancel.is_cancelled() {
            return Pull::Cancelled;
        }

        // Decoder lock and queue lock are taken one after the other, never nested.
        let Some(capture) = self.module.capture() else {
            return Pull::EndOfStream;
        };
        self.clock()
            .record(capture.row, capture.pattern, capture.channel_volumes);

        let frames = self.module.render(self.sample_rate, out);
        if frames == 0 {
            tracing::info!(
                position = self.module.position_seconds(),
                "module finished"
            );
            return Pull::EndOfStream;
        }

        self.clock().advance(frames);
        Pull::Data { frames }
    }
}
