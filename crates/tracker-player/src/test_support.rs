//! In-memory fixtures: a MOD file builder and an output that never touches hardware.
//!
//! Built for this crate's tests and, with the `test-support` feature, for
//! downstream crates.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{Pull, PullSource};
use crate::output::{AudioOutput, StreamFormat};

struct SampleDef {
    name: String,
    data: Vec<i8>,
    volume: u8,
    loop_range: Option<(usize, usize)>,
}

/// Builds ProTracker module bytes cell by cell.
pub struct ModBuilder {
    channels: usize,
    title: String,
    samples: Vec<Option<SampleDef>>,
    orders: Vec<u8>,
    hidden: Vec<(usize, u8)>,
    cells: Vec<(usize, usize, usize, [u8; 4])>,
}

impl ModBuilder {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            title: String::new(),
            samples: (0..31).map(|_| None).collect(),
            orders: vec![0],
            hidden: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// One-shot sample in 1-based `slot`.
    pub fn sample(mut self, slot: usize, name: &str, data: &[i8], volume: u8) -> Self {
        self.samples[slot - 1] = Some(SampleDef {
            name: name.to_string(),
            data: data.to_vec(),
            volume,
            loop_range: None,
        });
        self
    }

    /// Sample that loops over its whole body.
    pub fn looped_sample(
        mut self,
        slot: usize,
        name: &str,
        data: &[i8],
        volume: u8,
    ) -> Self {
        self.samples[slot - 1] = Some(SampleDef {
            name: name.to_string(),
            data: data.to_vec(),
            volume,
            loop_range: Some((0, data.len())),
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn note(
        mut self,
        pattern: usize,
        row: usize,
        channel: usize,
        period: u16,
        sample: u8,
        effect: u8,
        param: u8,
    ) -> Self {
        let raw = [
            (sample & 0xF0) | ((period >> 8) as u8 & 0x0F),
            (period & 0xFF) as u8,
            (sample << 4) | (effect & 0x0F),
            param,
        ];
        self.cells.push((pattern, row, channel, raw));
        self
    }

    pub fn orders(mut self, orders: &[u8]) -> Self {
        self.orders = orders.to_vec();
        self
    }

    /// Order-table entry past the song length.
    pub fn hidden_order(mut self, index: usize, pattern: u8) -> Self {
        self.hidden.push((index, pattern));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0u8; 1084];
        for (dst, src) in out[..20].iter_mut().zip(self.title.bytes()) {
            *dst = src;
        }

        for (slot, def) in self.samples.iter().enumerate() {
            let Some(def) = def else { continue };
            let header = &mut out[20 + slot * 30..20 + (slot + 1) * 30];
            for (dst, src) in header[..22].iter_mut().zip(def.name.bytes()) {
                *dst = src;
            }
            let words = def.data.len().div_ceil(2) as u16;
            header[22..24].copy_from_slice(&words.to_be_bytes());
            header[25] = def.volume;
            let (start, len) = def.loop_range.unwrap_or((0, 2));
            header[26..28].copy_from_slice(&((start / 2) as u16).to_be_bytes());
            header[28..30].copy_from_slice(&((len / 2) as u16).to_be_bytes());
        }

        out[950] = self.orders.len() as u8;
        out[951] = 127;
        for (i, &p) in self.orders.iter().enumerate() {
            out[952 + i] = p;
        }
        for &(i, p) in &self.hidden {
            out[952 + i] = p;
        }
        let tag = match self.channels {
            4 => "M.K.".to_string(),
            n if n < 10 => format!("{n}CHN"),
            n => format!("{n}CH"),
        };
        out[1080..1084].copy_from_slice(tag.as_bytes());

        let num_patterns = usize::from(*out[952..1080].iter().max().unwrap_or(&0)) + 1;
        let pattern_len = 64 * self.channels * 4;
        let mut patterns = vec![0u8; num_patterns * pattern_len];
        for (pattern, row, channel, raw) in &self.cells {
            let at = ((pattern * 64 + row) * self.channels + channel) * 4;
            patterns[at..at + 4].copy_from_slice(raw);
        }
        out.extend_from_slice(&patterns);

        for def in self.samples.iter().flatten() {
            out.extend(def.data.iter().map(|&s| s as u8));
            if def.data.len() % 2 == 1 {
                out.push(0);
            }
        }
        out
    }
}

/// Four channels, one 64-row pattern: sample 1 on channel 0 every 4 rows,
/// sample 2 on channel 1 at rows 0 and 32.
pub fn demo_module() -> Vec<u8> {
    let square: Vec<i8> = (0..64).map(|i| if i < 32 { 96 } else { -96 }).collect();
    let saw: Vec<i8> = (0..64).map(|i| (i * 4 - 128) as i8).collect();
    let mut builder = ModBuilder::new(4)
        .title("sync demo")
        .looped_sample(1, "square", &square, 64)
        .looped_sample(2, "saw", &saw, 48);
    for row in (0..64).step_by(4) {
        builder = builder.note(0, row, 0, 428, 1, 0, 0);
    }
    builder
        .note(0, 0, 1, 214, 2, 0, 0)
        .note(0, 32, 1, 285, 2, 0, 0)
        .build()
}

#[derive(Default)]
struct FakeState {
    source: Option<Box<dyn PullSource>>,
    playing: bool,
    buffered: VecDeque<i16>,
    ended: bool,
    resets: usize,
}

/// Output that buffers pulled audio in memory; tests drain it by hand.
pub struct FakeOutput {
    format: StreamFormat,
    chunk_frames: usize,
    state: Mutex<FakeState>,
    feed: Mutex<()>,
}

impl FakeOutput {
    pub fn new(sample_rate: u32, chunk_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            format: StreamFormat::stereo_i16(sample_rate),
            chunk_frames,
            state: Mutex::new(FakeState::default()),
            feed: Mutex::new(()),
        })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pull one chunk from the attached source, as the feeder thread would.
    pub fn pump(&self) -> Option<Pull> {
        let _feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut source = {
            let mut st = self.state();
            if !st.playing || st.ended {
                return None;
            }
            st.source.take()?
        };
        let mut chunk = vec![0i16; self.chunk_frames * 2];
        let pull = source.pull(&mut chunk);
        let mut st = self.state();
        if let Pull::Data { frames } = pull {
            st.buffered.extend(&chunk[..frames * 2]);
        }
        if pull == Pull::EndOfStream {
            st.ended = true;
        }
        st.source = Some(source);
        Some(pull)
    }

    /// Play `frames` of buffered audio, returning what the device would hear.
    pub fn consume(&self, frames: usize) -> Vec<i16> {
        let mut st = self.state();
        let n = (frames * 2).min(st.buffered.len());
        st.buffered.drain(..n).collect()
    }

    pub fn buffered_frames(&self) -> usize {
        self.state().buffered.len() / 2
    }

    pub fn is_playing(&self) -> bool {
        self.state().playing
    }

    pub fn resets(&self) -> usize {
        self.state().resets
    }
}

impl AudioOutput for FakeOutput {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn attach(&self, source: Box<dyn PullSource>) {
        let mut st = self.state();
        st.source = Some(source);
        st.ended = false;
    }

    fn play(&self) {
        self.state().playing = true;
    }

    fn pause(&self) {
        self.state().playing = false;
    }

    fn reset(&self) {
        let mut st = self.state();
        st.buffered.clear();
        st.playing = false;
        st.ended = false;
        st.resets += 1;
    }

    fn close(&self) {
        let mut st = self.state();
        st.source = None;
        st.playing = false;
        st.buffered.clear();
    }

    fn unplayed_bytes(&self) -> usize {
        self.state().buffered.len() * 2
    }

    fn hold_feed(&self) -> MutexGuard<'_, ()> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
