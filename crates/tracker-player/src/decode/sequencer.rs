//! Built-in ProTracker sequencer and mixer.
//!
//! Timing follows the tracker convention: each row lasts `speed` ticks and a
//! tick lasts `2.5 / tempo` seconds. Row effects run on tick 0, slides and
//! modulation on the remaining ticks. The song ends when the order list runs
//! out or playback revisits a row it has already played.

use crate::config::Interpolation;
use crate::error::{LoadError, ParamError};
use crate::snapshot::PatternCell;

use super::format::{self, ModFile, Note, ROWS_PER_PATTERN};
use super::mixer::{self, LoopRange};
use super::{Decoder, Metadata};

const DEFAULT_SPEED: usize = 6;
const DEFAULT_TEMPO: usize = 125;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_SEPARATION: i32 = 100;
const MIN_PERIOD: u16 = 113;
const MAX_PERIOD: u16 = 856;

/// ProTracker vibrato/tremolo half-wave.
const SINE_TABLE: [u8; 32] = [
    0, 24, 49, 74, 97, 120, 141, 161, 180, 197, 212, 224, 235, 244, 250, 253, 255, 253, 250,
    244, 235, 224, 212, 197, 180, 161, 141, 120, 97, 74, 49, 24,
];

#[derive(Clone, Copy, Debug, Default)]
struct Oscillator {
    pos: u8,
    speed: u8,
    depth: u8,
}

impl Oscillator {
    fn set(&mut self, param: u8) {
        if param >> 4 != 0 {
            self.speed = param >> 4;
        }
        if param & 0x0F != 0 {
            self.depth = param & 0x0F;
        }
    }

    /// Current offset scaled down by `shift`, then step forward.
    fn tick(&mut self, shift: u32) -> i32 {
        let magnitude =
            (i32::from(SINE_TABLE[usize::from(self.pos & 31)]) * i32::from(self.depth)) >> shift;
        let value = if self.pos >= 32 { -magnitude } else { magnitude };
        self.pos = (self.pos + self.speed) & 63;
        value
    }
}

#[derive(Clone, Debug, Default)]
struct Voice {
    /// 1-based sample slot, 0 when nothing has been assigned.
    sample: usize,
    pos: f64,
    active: bool,
    period: u16,
    target_period: u16,
    porta_speed: u8,
    volume: u8,
    finetune: i8,
    effect: u8,
    param: u8,
    offset_memory: u8,
    vibrato: Oscillator,
    tremolo: Oscillator,
    /// Per-tick modulation applied on top of `period` / `volume`.
    period_offset: i32,
    volume_offset: i32,
    arpeggio_semitones: u8,
    delayed: Option<Note>,
}

impl Voice {
    fn effective_period(&self) -> f64 {
        let base = (i32::from(self.period) + self.period_offset).max(i32::from(MIN_PERIOD) / 2);
        let semis = f64::from(self.arpeggio_semitones);
        f64::from(base) * 2f64.powf(-semis / 12.0)
    }

    fn effective_volume(&self) -> f32 {
        (i32::from(self.volume) + self.volume_offset).clamp(0, 64) as f32 / 64.0
    }

    fn slide_volume(&mut self, param: u8) {
        let up = param >> 4;
        let down = param & 0x0F;
        let v = i32::from(self.volume);
        let next = if up > 0 { v + i32::from(up) } else { v - i32::from(down) };
        self.volume = next.clamp(0, 64) as u8;
    }

    fn slide_period(&mut self, delta: i32) {
        let next = i32::from(self.period) + delta;
        self.period = next.clamp(i32::from(MIN_PERIOD), i32::from(MAX_PERIOD)) as u16;
    }

    fn tone_portamento(&mut self) {
        if self.target_period == 0 || self.period == 0 {
            return;
        }
        let speed = u16::from(self.porta_speed);
        if self.period < self.target_period {
            self.period = (self.period + speed).min(self.target_period);
        } else if self.period > self.target_period {
            self.period = self.period.saturating_sub(speed).max(self.target_period);
        }
    }
}

/// Position within the order list plus row timing.
#[derive(Clone, Debug)]
struct Transport {
    order: usize,
    row: usize,
    tick: usize,
    speed: usize,
    tempo: usize,
    /// Frames left in the current tick; below one means a new tick is due.
    tick_remaining: f64,
    jump_order: Option<usize>,
    break_row: Option<usize>,
    /// Row most recently entered, reported as the current position.
    shown_order: usize,
    shown_row: usize,
    ended: bool,
}

impl Transport {
    fn new() -> Self {
        Self {
            order: 0,
            row: 0,
            tick: 0,
            speed: DEFAULT_SPEED,
            tempo: DEFAULT_TEMPO,
            tick_remaining: 0.0,
            jump_order: None,
            break_row: None,
            shown_order: 0,
            shown_row: 0,
            ended: false,
        }
    }

    fn tick_seconds(&self) -> f64 {
        2.5 / self.tempo as f64
    }
}

/// Decoder for ProTracker-compatible MOD files.
pub struct ModDecoder {
    song: ModFile,
    sample_rate: u32,
    separation: i32,
    interpolation: Interpolation,
    transport: Transport,
    voices: Vec<Voice>,
    muted: Vec<bool>,
    peaks: Vec<f32>,
    vu: Vec<f32>,
    /// One bit per row for each order entry.
    visited: Vec<u64>,
    frames_rendered: u64,
    duration_seconds: f64,
}

impl ModDecoder {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let song = ModFile::parse(bytes)?;
        let channels = song.channels;
        let orders = song.orders.len();
        let mut decoder = Self {
            song,
            sample_rate: DEFAULT_SAMPLE_RATE,
            separation: DEFAULT_SEPARATION,
            interpolation: Interpolation::Default,
            transport: Transport::new(),
            voices: vec![Voice::default(); channels],
            muted: vec![false; channels],
            peaks: vec![0.0; channels],
            vu: vec![0.0; channels],
            visited: vec![0; orders],
            frames_rendered: 0,
            duration_seconds: 0.0,
        };
        decoder.duration_seconds = decoder.measure_duration();
        Ok(decoder)
    }

    fn restart(&mut self) {
        self.transport = Transport::new();
        self.voices.iter_mut().for_each(|v| *v = Voice::default());
        self.visited.iter_mut().for_each(|bits| *bits = 0);
        self.peaks.iter_mut().for_each(|p| *p = 0.0);
        self.vu.iter_mut().for_each(|p| *p = 0.0);
        self.frames_rendered = 0;
    }

    /// Walk the whole song once without rendering.
    fn measure_duration(&mut self) -> f64 {
        let mut seconds = 0.0;
        loop {
            self.next_tick();
            if self.transport.ended {
                break;
            }
            seconds += self.transport.tick_seconds();
        }
        self.restart();
        seconds
    }

    fn tick_frames(&self) -> f64 {
        f64::from(self.sample_rate) * self.transport.tick_seconds()
    }

    /// Advance the sequencer by one tick.
    fn next_tick(&mut self) {
        if self.transport.tick == 0 {
            if !self.enter_row() {
                self.transport.ended = true;
                return;
            }
            self.play_row();
        } else {
            self.update_effects();
        }

        self.transport.tick += 1;
        if self.transport.tick >= self.transport.speed {
            self.transport.tick = 0;
            let t = &mut self.transport;
            if t.jump_order.is_some() || t.break_row.is_some() {
                t.order = t.jump_order.take().unwrap_or(t.order + 1);
                t.row = t.break_row.take().unwrap_or(0);
            } else {
                t.row += 1;
                if t.row >= ROWS_PER_PATTERN {
                    t.row = 0;
                    t.order += 1;
                }
            }
        }
    }

    /// Mark the upcoming row as played. Returns `false` when the song is over.
    fn enter_row(&mut self) -> bool {
        let t = &mut self.transport;
        let Some(bits) = self.visited.get_mut(t.order) else {
            return false;
        };
        let mask = 1u64 << t.row;
        if *bits & mask != 0 {
            return false;
        }
        *bits |= mask;
        t.shown_order = t.order;
        t.shown_row = t.row;
        true
    }

    fn current_pattern_index(&self) -> usize {
        self.song
            .orders
            .get(self.transport.shown_order)
            .map_or(0, |&p| usize::from(p))
    }

    fn play_row(&mut self) {
        let pattern = self.current_pattern_index();
        let row = self.transport.shown_row;
        for ch in 0..self.voices.len() {
            let note = self.song.note(pattern, row, ch);
            let voice = &mut self.voices[ch];
            voice.effect = note.effect;
            voice.param = note.param;
            voice.period_offset = 0;
            voice.volume_offset = 0;
            voice.arpeggio_semitones = 0;
            voice.delayed = None;

            if note.effect == 0xE && note.param >> 4 == 0xD && note.param & 0x0F != 0 {
                voice.delayed = Some(note);
                continue;
            }
            self.trigger(ch, note);
            self.row_effect(ch, note);
        }
    }

    fn trigger(&mut self, ch: usize, note: Note) {
        let voice = &mut self.voices[ch];
        if note.sample > 0 {
            if let Some(sample) = self.song.samples.get(usize::from(note.sample) - 1) {
                voice.sample = usize::from(note.sample);
                voice.volume = sample.volume;
                voice.finetune = sample.finetune;
            }
        }
        if note.period == 0 {
            return;
        }
        let period = tuned_period(note.period, voice.finetune);
        if matches!(note.effect, 0x3 | 0x5) {
            voice.target_period = period;
            return;
        }
        voice.period = period;
        voice.pos = 0.0;
        voice.vibrato.pos = 0;
        voice.tremolo.pos = 0;
        voice.active = voice.sample > 0
            && self
                .song
                .samples
                .get(voice.sample.wrapping_sub(1))
                .is_some_and(|s| !s.data.is_empty());
    }

    fn row_effect(&mut self, ch: usize, note: Note) {
        let param = note.param;
        let (hi, lo) = (param >> 4, param & 0x0F);
        match note.effect {
            0x3 => {
                if param != 0 {
                    self.voices[ch].porta_speed = param;
                }
            }
            0x4 => self.voices[ch].vibrato.set(param),
            0x7 => self.voices[ch].tremolo.set(param),
            0x9 => {
                let voice = &mut self.voices[ch];
                if param != 0 {
                    voice.offset_memory = param;
                }
                if note.period != 0 {
                    let offset = usize::from(voice.offset_memory) * 256;
                    let len = self
                        .song
                        .samples
                        .get(voice.sample.wrapping_sub(1))
                        .map_or(0, |s| s.data.len());
                    if offset < len {
                        voice.pos = offset as f64;
                    } else {
                        voice.active = false;
                    }
                }
            }
            0xB => {
                self.transport.jump_order = Some(usize::from(param));
            }
            0xC => self.voices[ch].volume = param.min(64),
            0xD => {
                let row = usize::from(hi) * 10 + usize::from(lo);
                self.transport.break_row = Some(if row < ROWS_PER_PATTERN { row } else { 0 });
            }
            0xE => match hi {
                0x1 => self.voices[ch].slide_period(-i32::from(lo)),
                0x2 => self.voices[ch].slide_period(i32::from(lo)),
                0xA => self.voices[ch].slide_volume(lo << 4),
                0xB => self.voices[ch].slide_volume(lo),
                0xC if lo == 0 => self.voices[ch].volume = 0,
                _ => {}
            },
            0xF => match param {
                0 => {}
                1..=0x1F => self.transport.speed = usize::from(param),
                _ => self.transport.tempo = usize::from(param),
            },
            _ => {}
        }
    }

    fn update_effects(&mut self) {
        let tick = self.transport.tick;
        for ch in 0..self.voices.len() {
            let voice = &mut self.voices[ch];
            let param = voice.param;
            let (hi, lo) = (param >> 4, param & 0x0F);
            voice.period_offset = 0;
            voice.volume_offset = 0;
            voice.arpeggio_semitones = 0;
            match voice.effect {
                0x0 if param != 0 => {
                    voice.arpeggio_semitones = match tick % 3 {
                        1 => hi,
                        2 => lo,
                        _ => 0,
                    };
                }
                0x1 => voice.slide_period(-i32::from(param)),
                0x2 => voice.slide_period(i32::from(param)),
                0x3 => voice.tone_portamento(),
                0x4 => voice.period_offset = voice.vibrato.tick(7),
                0x5 => {
                    voice.tone_portamento();
                    voice.slide_volume(param);
                }
                0x6 => {
                    voice.period_offset = voice.vibrato.tick(7);
                    voice.slide_volume(param);
                }
                0x7 => voice.volume_offset = voice.tremolo.tick(6),
                0xA => voice.slide_volume(param),
                0xE => match hi {
                    0x9 if lo != 0 && tick % usize::from(lo) == 0 => voice.pos = 0.0,
                    0xC if usize::from(lo) == tick => voice.volume = 0,
                    0xD if usize::from(lo) == tick => {
                        if let Some(note) = voice.delayed.take() {
                            self.trigger(ch, note);
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    /// Render or skip `frames` frames. With `out`, voices are mixed into it.
    fn run(&mut self, frames: usize, mut out: Option<&mut [i16]>) -> usize {
        let mut done = 0;
        while done < frames {
            if self.transport.tick_remaining < 1.0 {
                self.next_tick();
                if self.transport.ended {
                    break;
                }
                self.transport.tick_remaining += self.tick_frames();
            }
            let n = (frames - done).min(self.transport.tick_remaining as usize).max(1);
            match out.as_deref_mut() {
                Some(buf) => self.mix(&mut buf[done * 2..(done + n) * 2]),
                None => self.skip(n),
            }
            done += n;
            self.transport.tick_remaining -= n as f64;
        }
        self.frames_rendered += done as u64;
        done
    }

    fn loop_range(&self, sample: usize) -> Option<LoopRange> {
        self.song
            .samples
            .get(sample.wrapping_sub(1))
            .filter(|s| s.has_loop())
            .map(|s| LoopRange {
                start: s.loop_start,
                end: s.loop_end(),
            })
    }

    fn mix(&mut self, out: &mut [i16]) {
        let master = mixer::master_gain(self.voices.len());
        let gains: Vec<(f32, f32)> = (0..self.voices.len())
            .map(|ch| mixer::pan_gains(ch, self.separation))
            .collect();
        let steps: Vec<f64> = self
            .voices
            .iter()
            .map(|v| mixer::step_for_period(v.effective_period(), self.sample_rate))
            .collect();
        let loops: Vec<Option<LoopRange>> =
            self.voices.iter().map(|v| self.loop_range(v.sample)).collect();

        for frame in out.chunks_exact_mut(2) {
            let mut left = 0.0f32;
            let mut right = 0.0f32;
            for (ch, voice) in self.voices.iter_mut().enumerate() {
                if !voice.active {
                    continue;
                }
                let Some(sample) = self.song.samples.get(voice.sample.wrapping_sub(1)) else {
                    voice.active = false;
                    continue;
                };
                let value = mixer::sample_at(&sample.data, voice.pos, loops[ch], self.interpolation)
                    * voice.effective_volume();
                if !self.muted[ch] {
                    self.peaks[ch] = self.peaks[ch].max(value.abs());
                    left += value * gains[ch].0;
                    right += value * gains[ch].1;
                }
                match mixer::advance(voice.pos, steps[ch], sample.data.len(), loops[ch]) {
                    Some(pos) => voice.pos = pos,
                    None => voice.active = false,
                }
            }
            frame[0] = mixer::to_i16(left * master);
            frame[1] = mixer::to_i16(right * master);
        }
    }

    fn skip(&mut self, frames: usize) {
        for ch in 0..self.voices.len() {
            if !self.voices[ch].active {
                continue;
            }
            let looped = self.loop_range(self.voices[ch].sample);
            let len = self
                .song
                .samples
                .get(self.voices[ch].sample.wrapping_sub(1))
                .map_or(0, |s| s.data.len());
            let voice = &mut self.voices[ch];
            let step = mixer::step_for_period(voice.effective_period(), self.sample_rate);
            match mixer::advance(voice.pos, step * frames as f64, len, looped) {
                Some(pos) => voice.pos = pos,
                None => voice.active = false,
            }
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate || sample_rate == 0 {
            return;
        }
        let ratio = f64::from(sample_rate) / f64::from(self.sample_rate);
        self.frames_rendered = (self.frames_rendered as f64 * ratio).round() as u64;
        self.transport.tick_remaining *= ratio;
        self.sample_rate = sample_rate;
    }
}

/// Apply sample finetune (eighths of a semitone) to a period.
fn tuned_period(period: u16, finetune: i8) -> u16 {
    if finetune == 0 {
        return period;
    }
    let scaled = f64::from(period) * 2f64.powf(-f64::from(finetune) / 96.0);
    scaled.round() as u16
}

impl Decoder for ModDecoder {
    fn read(&mut self, sample_rate: u32, out: &mut [i16]) -> usize {
        self.set_sample_rate(sample_rate);
        self.peaks.iter_mut().for_each(|p| *p = 0.0);
        let frames = self.run(out.len() / 2, Some(out));
        self.vu.copy_from_slice(&self.peaks);
        frames
    }

    fn position_seconds(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    fn set_position_seconds(&mut self, seconds: f64) {
        self.restart();
        let target = (seconds.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let mut remaining = target;
        while remaining > 0 && !self.transport.ended {
            let chunk = remaining.min(u64::from(u32::MAX)) as usize;
            let skipped = self.run(chunk, None);
            if skipped == 0 {
                break;
            }
            remaining -= skipped as u64;
        }
        tracing::debug!(seconds, reached = self.position_seconds(), "seeked module");
    }

    fn current_row(&self) -> usize {
        self.transport.shown_row
    }

    fn current_pattern(&self) -> usize {
        self.current_pattern_index()
    }

    fn num_channels(&self) -> usize {
        self.song.channels
    }

    fn num_patterns(&self) -> usize {
        self.song.num_patterns()
    }

    fn pattern_num_rows(&self, pattern: usize) -> usize {
        if pattern < self.song.num_patterns() {
            ROWS_PER_PATTERN
        } else {
            0
        }
    }

    fn pattern_cell(&self, pattern: usize, row: usize, channel: usize) -> PatternCell {
        let note = self.song.note(pattern, row, channel);
        PatternCell {
            note: format::note_number(note.period),
            instrument: note.sample,
            volume: 0,
            effect: (u16::from(note.effect) << 8) | u16::from(note.param),
        }
    }

    fn channel_vu(&self, channel: usize) -> f32 {
        self.vu.get(channel).copied().unwrap_or(0.0)
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            title: self.song.title.clone(),
            artist: String::new(),
            kind: self.song.kind.clone(),
            duration_seconds: self.duration_seconds,
            channels: self.song.channels,
        }
    }

    fn set_stereo_separation(&mut self, percent: i32) -> Result<(), ParamError> {
        if !(0..=200).contains(&percent) {
            return Err(ParamError::StereoSeparation(percent));
        }
        self.separation = percent;
        Ok(())
    }

    fn set_interpolation(&mut self, quality: Interpolation) -> Result<(), ParamError> {
        self.interpolation = quality;
        Ok(())
    }

    fn is_channel_muted(&self, channel: usize) -> bool {
        self.muted.get(channel).copied().unwrap_or(false)
    }

    fn set_channel_muted(&mut self, channel: usize, muted: bool) {
        if let Some(slot) = self.muted.get_mut(channel) {
            *slot = muted;
        }
    }

    fn instrument_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn sample_names(&self) -> Vec<String> {
        self.song.samples.iter().map(|s| s.name.clone()).collect()
    }
}
