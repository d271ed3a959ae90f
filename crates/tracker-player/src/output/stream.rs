//! CPAL-backed [`AudioOutput`].
//!
//! Three pieces cooperate:
//! - a device thread that owns the `cpal::Stream` (it may not be `Send`)
//!   and parks until the output is closed
//! - a feeder thread that pulls chunks from the attached source while
//!   playing and while the buffer has room
//! - the real-time callback, which drains the buffer without waiting and
//!   plays silence when paused or starved

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use crate::config::OutputConfig;
use crate::engine::{Pull, PullSource};
use crate::error::PlayerError;
use crate::output::buffer::{SampleBuffer, calc_max_buffered_samples};
use crate::output::{AudioOutput, StreamFormat, device};

const ROOM_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Control {
    source: Option<Box<dyn PullSource>>,
    playing: bool,
    ended: bool,
    closed: bool,
}

struct Shared {
    buffer: SampleBuffer,
    control: Mutex<Control>,
    wake: Condvar,
    /// Read by the callback; mirrors `!control.playing`.
    paused: AtomicBool,
    /// Frames between the callback and the speaker, from stream timestamps.
    latency_frames: AtomicU64,
}

impl Shared {
    fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            control: Mutex::new(Control::default()),
            wake: Condvar::new(),
            paused: AtomicBool::new(true),
            latency_frames: AtomicU64::new(0),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frames not yet heard. While paused the device is being fed silence,
    /// so whatever it held when the pause started has already played.
    fn unplayed_frames(&self) -> usize {
        let buffered = self.buffer.len_frames();
        if self.paused.load(Ordering::Relaxed) {
            return buffered;
        }
        buffered + self.latency_frames.load(Ordering::Relaxed) as usize
    }

    fn latency(&self, sample_rate: u32) -> Duration {
        let frames = self.latency_frames.load(Ordering::Relaxed);
        Duration::from_secs_f64(frames as f64 / f64::from(sample_rate.max(1)))
    }

    /// Block until there is something to pull. `false` once closed.
    fn wait_until_wanted(&self) -> bool {
        let control = self.control();
        let control = self
            .wake
            .wait_while(control, |c| {
                !c.closed && !(c.playing && !c.ended && c.source.is_some())
            })
            .unwrap_or_else(PoisonError::into_inner);
        !control.closed
    }

    fn take_source(&self) -> Option<Box<dyn PullSource>> {
        let mut control = self.control();
        if control.closed || !control.playing || control.ended {
            return None;
        }
        control.source.take()
    }

    fn return_source(&self, source: Box<dyn PullSource>, pull: Pull) {
        let mut control = self.control();
        if control.closed {
            return;
        }
        if control.source.is_none() {
            control.source = Some(source);
        }
        if matches!(pull, Pull::EndOfStream | Pull::Cancelled) {
            control.ended = true;
        }
    }

    fn wait_closed(&self) {
        let control = self.control();
        let _closed = self
            .wake
            .wait_while(control, |c| !c.closed)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

struct Ready {
    shared: Arc<Shared>,
    format: StreamFormat,
    device_name: String,
}

/// Plays pulled audio on a CPAL output device.
pub struct CpalOutput {
    format: StreamFormat,
    device_name: String,
    shared: Arc<Shared>,
    feed: Arc<Mutex<()>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the configured device and start its (silent) stream.
    ///
    /// The stream runs at the device's rate closest to `config.sample_rate`;
    /// check [`AudioOutput::format`] for what was granted.
    pub fn open(config: &OutputConfig) -> Result<Self, PlayerError> {
        Self::start(config.clone()).map_err(PlayerError::device)
    }

    fn start(config: OutputConfig) -> Result<Self> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<Ready>>(1);
        let chunk_frames = config.chunk_frames.max(64);

        let device_thread = thread::Builder::new()
            .name("audio-device".to_string())
            .spawn(move || match start_device(&config) {
                Ok((stream, ready)) => {
                    let shared = ready.shared.clone();
                    if ready_tx.send(Ok(ready)).is_err() {
                        return;
                    }
                    shared.wait_closed();
                    drop(stream);
                    tracing::debug!("audio device released");
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("spawn audio device thread")?;

        let ready = match ready_rx.recv() {
            Ok(ready) => ready,
            Err(_) => Err(anyhow!("audio device thread exited during startup")),
        };
        let ready = match ready {
            Ok(ready) => ready,
            Err(err) => {
                let _ = device_thread.join();
                return Err(err);
            }
        };

        let feed = Arc::new(Mutex::new(()));
        let feeder = {
            let shared = ready.shared.clone();
            let feed = feed.clone();
            thread::Builder::new()
                .name("audio-feeder".to_string())
                .spawn(move || feed_loop(&shared, &feed, chunk_frames))
        };
        let feeder = match feeder {
            Ok(handle) => handle,
            Err(err) => {
                close_shared(&ready.shared);
                let _ = device_thread.join();
                return Err(err).context("spawn audio feeder thread");
            }
        };

        tracing::info!(
            device = %ready.device_name,
            sample_rate = ready.format.sample_rate,
            buffer_frames = ready.shared.buffer.capacity_samples() / 2,
            "audio output opened"
        );

        Ok(Self {
            format: ready.format,
            device_name: ready.device_name,
            shared: ready.shared,
            feed,
            threads: Mutex::new(vec![feeder, device_thread]),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// The source has ended and every buffered sample was handed to the device.
    ///
    /// The device may still be playing the last [`CpalOutput::latency`] of it.
    pub fn is_drained(&self) -> bool {
        self.shared.control().ended && self.shared.buffer.len_samples() == 0
    }

    /// How long the device takes to play what it has been handed.
    pub fn latency(&self) -> Duration {
        self.shared.latency(self.format.sample_rate)
    }
}

impl AudioOutput for CpalOutput {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn attach(&self, source: Box<dyn PullSource>) {
        let _gate = self.hold_feed();
        let mut control = self.shared.control();
        control.source = Some(source);
        control.ended = false;
        drop(control);
        self.shared.wake.notify_all();
    }

    fn play(&self) {
        let mut control = self.shared.control();
        if control.closed {
            return;
        }
        control.playing = true;
        self.shared.paused.store(false, Ordering::Relaxed);
        drop(control);
        self.shared.wake.notify_all();
    }

    fn pause(&self) {
        let mut control = self.shared.control();
        control.playing = false;
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    fn reset(&self) {
        let mut control = self.shared.control();
        control.playing = false;
        control.ended = false;
        self.shared.paused.store(true, Ordering::Relaxed);
        drop(control);
        let dropped = self.shared.buffer.clear();
        tracing::trace!(dropped, "output flushed");
    }

    fn close(&self) {
        close_shared(&self.shared);
        let handles: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("audio thread panicked");
            }
        }
    }

    fn unplayed_bytes(&self) -> usize {
        self.shared.unplayed_frames() * self.format.bytes_per_frame()
    }

    fn hold_feed(&self) -> MutexGuard<'_, ()> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn close_shared(shared: &Shared) {
    let mut control = shared.control();
    control.closed = true;
    control.playing = false;
    control.source = None;
    shared.paused.store(true, Ordering::Relaxed);
    drop(control);
    shared.wake.notify_all();
    shared.buffer.clear();
}

fn feed_loop(shared: &Shared, feed: &Mutex<()>, chunk_frames: usize) {
    let mut chunk = vec![0i16; chunk_frames * 2];
    loop {
        if !shared.wait_until_wanted() {
            return;
        }
        if !shared.buffer.wait_for_room(chunk.len(), ROOM_POLL) {
            continue;
        }

        let _gate = feed.lock().unwrap_or_else(PoisonError::into_inner);
        // State may have changed while waiting for the gate.
        let Some(mut source) = shared.take_source() else {
            continue;
        };
        let pull = source.pull(&mut chunk);
        match pull {
            Pull::Data { frames } => {
                shared.buffer.push(&chunk[..frames * 2]);
            }
            Pull::EndOfStream => tracing::info!("end of stream"),
            Pull::Cancelled => tracing::info!("playback cancelled"),
        }
        shared.return_source(source, pull);
        if pull == Pull::Cancelled {
            return;
        }
    }
}

fn start_device(config: &OutputConfig) -> Result<(cpal::Stream, Ready)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, config.device.as_deref())?;
    let device_name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "unknown device".to_string());

    let supported = device::pick_output_config(&device, config.sample_rate)?;
    let sample_format = supported.sample_format();
    let mut stream_config: cpal::StreamConfig = supported.config();
    let sample_rate = stream_config.sample_rate;

    let capacity = calc_max_buffered_samples(sample_rate, 2, config.buffer_ms)
        .max(config.chunk_frames.max(64) * 2 * 2);
    if let Some(size) = device::pick_buffer_size(&supported, (capacity / 8) as u32) {
        stream_config.buffer_size = size;
    }

    let shared = Arc::new(Shared::new(SampleBuffer::new(2, capacity)));
    let stream = match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, shared.clone()),
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, shared.clone()),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, shared.clone()),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, shared.clone()),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;

    Ok((
        stream,
        Ready {
            shared,
            format: StreamFormat::stereo_i16(sample_rate),
            device_name,
        },
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels_out = usize::from(config.channels).max(1);
    let sample_rate = f64::from(config.sample_rate);
    let mut scratch: Vec<i16> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            if let Some(delay) = ts.playback.duration_since(&ts.callback) {
                let frames = (delay.as_secs_f64() * sample_rate) as u64;
                shared.latency_frames.store(frames, Ordering::Relaxed);
            }

            if shared.paused.load(Ordering::Relaxed) {
                data.fill(T::EQUILIBRIUM);
                return;
            }

            let frames = data.len() / channels_out;
            scratch.resize(frames * 2, 0);
            let got = shared.buffer.pop_into(&mut scratch) / 2;

            for (frame, out) in data.chunks_exact_mut(channels_out).enumerate() {
                if frame >= got {
                    out.fill(T::EQUILIBRIUM);
                    continue;
                }
                let (l, r) = (scratch[frame * 2], scratch[frame * 2 + 1]);
                for (ch, slot) in out.iter_mut().enumerate() {
                    *slot = T::from_sample(mapped_sample(l, r, channels_out, ch));
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Stereo source sample for device channel `dst_ch`.
///
/// Mono devices get the average; channels past the first two stay silent.
fn mapped_sample(l: i16, r: i16, dst_channels: usize, dst_ch: usize) -> i16 {
    match (dst_channels, dst_ch) {
        (1, _) => ((i32::from(l) + i32::from(r)) / 2) as i16,
        (_, 0) => l,
        (_, 1) => r,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        pulls: usize,
        limit: usize,
    }

    impl PullSource for Counter {
        fn pull(&mut self, out: &mut [i16]) -> Pull {
            if self.pulls == self.limit {
                return Pull::EndOfStream;
            }
            self.pulls += 1;
            out.fill(self.pulls as i16);
            Pull::Data {
                frames: out.len() / 2,
            }
        }
    }

    #[test]
    fn mono_device_gets_average() {
        assert_eq!(mapped_sample(1000, -3000, 1, 0), -1000);
        assert_eq!(mapped_sample(i16::MAX, i16::MAX, 1, 0), i16::MAX);
    }

    #[test]
    fn surround_device_keeps_front_pair() {
        assert_eq!(mapped_sample(5, 7, 6, 0), 5);
        assert_eq!(mapped_sample(5, 7, 6, 1), 7);
        assert_eq!(mapped_sample(5, 7, 6, 4), 0);
    }

    #[test]
    fn feeder_fills_until_end_of_stream() {
        let shared = Arc::new(Shared::new(SampleBuffer::new(2, 64)));
        let feed = Arc::new(Mutex::new(()));
        {
            let mut control = shared.control();
            control.source = Some(Box::new(Counter { pulls: 0, limit: 3 }));
            control.playing = true;
        }

        let handle = {
            let shared = shared.clone();
            let feed = feed.clone();
            thread::spawn(move || feed_loop(&shared, &feed, 8))
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !shared.control().ended && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(shared.control().ended);
        assert_eq!(shared.buffer.len_frames(), 24);

        close_shared(&shared);
        handle.join().unwrap();
        assert_eq!(shared.buffer.len_samples(), 0);
    }

    #[test]
    fn device_latency_counts_only_while_playing() {
        let shared = Shared::new(SampleBuffer::new(2, 64));
        shared.buffer.push(&[0; 20]);
        shared.latency_frames.store(441, Ordering::Relaxed);

        assert_eq!(shared.unplayed_frames(), 10);
        shared.paused.store(false, Ordering::Relaxed);
        assert_eq!(shared.unplayed_frames(), 451);
        shared.paused.store(true, Ordering::Relaxed);
        assert_eq!(shared.unplayed_frames(), 10);
    }

    #[test]
    fn latency_converts_frames_to_time() {
        let shared = Shared::new(SampleBuffer::new(2, 64));
        assert_eq!(shared.latency(44_100), Duration::ZERO);
        shared.latency_frames.store(441, Ordering::Relaxed);
        assert_eq!(shared.latency(44_100), Duration::from_millis(10));
        assert_eq!(shared.latency(0), Duration::from_secs(441));
    }

    #[test]
    fn feeder_waits_while_paused() {
        let shared = Arc::new(Shared::new(SampleBuffer::new(2, 64)));
        let feed = Arc::new(Mutex::new(()));
        shared.control().source = Some(Box::new(Counter { pulls: 0, limit: 100 }));

        let handle = {
            let shared = shared.clone();
            let feed = feed.clone();
            thread::spawn(move || feed_loop(&shared, &feed, 8))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(shared.buffer.len_samples(), 0);

        close_shared(&shared);
        handle.join().unwrap();
    }
}
