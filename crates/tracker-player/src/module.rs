//! The one owner of a loaded decoder.
//!
//! Every call takes the decoder lock exactly once. After [`Module::close`]
//! the decoder is gone and every accessor returns a zero value, so a UI tick
//! racing teardown reads blanks instead of failing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{Interpolation, PlaybackConfig};
use crate::decode::{self, Decoder, Metadata};
use crate::error::{LoadError, ParamError};
use crate::instruments::{self, Instrument};
use crate::snapshot::{CachedPattern, PatternCell, PatternRow, PatternSnapshot};

/// Decoder position taken just before a chunk is rendered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capture {
    pub row: usize,
    pub pattern: usize,
    pub channel_volumes: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    decoder: Option<Box<dyn Decoder>>,
    metadata: Option<Metadata>,
    muted: Vec<bool>,
    patterns: HashMap<usize, Arc<CachedPattern>>,
}

impl Inner {
    fn pattern(&mut self, pattern: usize) -> Arc<CachedPattern> {
        let Some(decoder) = self.decoder.as_deref() else {
            return Arc::default();
        };
        self.patterns
            .entry(pattern)
            .or_insert_with(|| {
                tracing::debug!(pattern, "caching pattern");
                Arc::new(CachedPattern::materialize(decoder, pattern))
            })
            .clone()
    }

    fn volumes(&self) -> Vec<f32> {
        match self.decoder.as_deref() {
            Some(d) => (0..d.num_channels()).map(|ch| d.channel_vu(ch)).collect(),
            None => Vec::new(),
        }
    }

    fn set_muted(&mut self, channel: usize, muted: bool) {
        if let Some(d) = self.decoder.as_deref_mut() {
            d.set_channel_muted(channel, muted);
        }
        if let Some(slot) = self.muted.get_mut(channel) {
            *slot = muted;
        }
    }
}

/// A loaded tracker module plus its display caches.
pub struct Module {
    inner: Mutex<Inner>,
}

impl Module {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        Ok(Self::from_decoder(decode::open(path)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        Ok(Self::from_decoder(decode::load(bytes)?))
    }

    pub fn from_decoder(decoder: Box<dyn Decoder>) -> Self {
        let muted = (0..decoder.num_channels())
            .map(|ch| decoder.is_channel_muted(ch))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                decoder: Some(decoder),
                metadata: None,
                muted,
                patterns: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply load-time settings.
    pub fn configure(&self, config: &PlaybackConfig) -> Result<(), ParamError> {
        self.set_stereo_separation(config.stereo_separation)?;
        self.set_interpolation(config.interpolation)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().decoder.is_some()
    }

    /// Cached after the first call; metadata never changes for a loaded module.
    pub fn metadata(&self) -> Metadata {
        let mut inner = self.lock();
        if let Some(meta) = &inner.metadata {
            return meta.clone();
        }
        let Some(decoder) = inner.decoder.as_deref() else {
            return Metadata::default();
        };
        let meta = decoder.metadata();
        inner.metadata = Some(meta.clone());
        meta
    }

    pub fn position_seconds(&self) -> f64 {
        self.lock()
            .decoder
            .as_deref()
            .map_or(0.0, |d| d.position_seconds())
    }

    pub fn set_position_seconds(&self, seconds: f64) {
        if let Some(d) = self.lock().decoder.as_deref_mut() {
            d.set_position_seconds(seconds);
        }
    }

    pub fn current_row(&self) -> usize {
        self.lock().decoder.as_deref().map_or(0, |d| d.current_row())
    }

    pub fn current_pattern(&self) -> usize {
        self.lock()
            .decoder
            .as_deref()
            .map_or(0, |d| d.current_pattern())
    }

    pub fn num_channels(&self) -> usize {
        self.lock().decoder.as_deref().map_or(0, |d| d.num_channels())
    }

    pub fn num_patterns(&self) -> usize {
        self.lock().decoder.as_deref().map_or(0, |d| d.num_patterns())
    }

    pub fn pattern_num_rows(&self, pattern: usize) -> usize {
        self.lock()
            .decoder
            .as_deref()
            .map_or(0, |d| d.pattern_num_rows(pattern))
    }

    pub fn pattern_cell(&self, pattern: usize, row: usize, channel: usize) -> PatternCell {
        self.lock()
            .decoder
            .as_deref()
            .map(|d| d.pattern_cell(pattern, row, channel))
            .unwrap_or_default()
    }

    /// Per-channel level of the last rendered block.
    pub fn channel_volumes(&self) -> Vec<f32> {
        self.lock().volumes()
    }

    /// Row, pattern and levels read under a single lock.
    pub fn capture(&self) -> Option<Capture> {
        let inner = self.lock();
        let decoder = inner.decoder.as_deref()?;
        Some(Capture {
            row: decoder.current_row(),
            pattern: decoder.current_pattern(),
            channel_volumes: inner.volumes(),
        })
    }

    /// Render into `out`; `0` once the song ends or after close.
    pub fn render(&self, sample_rate: u32, out: &mut [i16]) -> usize {
        self.lock()
            .decoder
            .as_deref_mut()
            .map_or(0, |d| d.read(sample_rate, out))
    }

    pub fn set_stereo_separation(&self, percent: i32) -> Result<(), ParamError> {
        let mut inner = self.lock();
        let decoder = inner.decoder.as_deref_mut().ok_or(ParamError::NotLoaded)?;
        decoder.set_stereo_separation(percent)
    }

    pub fn set_interpolation(&self, quality: Interpolation) -> Result<(), ParamError> {
        let mut inner = self.lock();
        let decoder = inner.decoder.as_deref_mut().ok_or(ParamError::NotLoaded)?;
        decoder.set_interpolation(quality)
    }

    /// Flip one channel. Returns the new muted state, or `None` for an
    /// unknown channel.
    pub fn toggle_channel_mute(&self, channel: usize) -> Option<bool> {
        let mut inner = self.lock();
        let muted = !*inner.muted.get(channel)?;
        inner.set_muted(channel, muted);
        Some(muted)
    }

    /// Leave only `channel` audible. Soloing the channel that is already the
    /// only audible one unmutes everything instead.
    ///
    /// Returns whether `channel` is now soloed.
    pub fn solo_channel(&self, channel: usize) -> bool {
        let mut inner = self.lock();
        let count = inner.muted.len();
        if channel >= count {
            return false;
        }
        let already_solo = inner
            .muted
            .iter()
            .enumerate()
            .all(|(ch, &muted)| muted == (ch != channel));
        for ch in 0..count {
            let muted = !already_solo && ch != channel;
            inner.set_muted(ch, muted);
        }
        !already_solo
    }

    pub fn is_channel_muted(&self, channel: usize) -> bool {
        self.lock().muted.get(channel).copied().unwrap_or(false)
    }

    pub fn muted_channels(&self) -> Vec<bool> {
        self.lock().muted.clone()
    }

    /// `visible_rows` rows of `pattern` centred on `row`.
    pub fn pattern_window(
        &self,
        pattern: usize,
        row: usize,
        visible_rows: usize,
    ) -> Vec<PatternRow> {
        self.lock().pattern(pattern).window(row, visible_rows)
    }

    /// Pattern window at the decoder's render position.
    pub fn snapshot(&self, visible_rows: usize) -> PatternSnapshot {
        let mut inner = self.lock();
        let Some(decoder) = inner.decoder.as_deref() else {
            return PatternSnapshot::default();
        };
        let current_row = decoder.current_row();
        let current_pattern = decoder.current_pattern();
        let num_channels = decoder.num_channels();
        let channel_volumes = inner.volumes();
        let rows = inner.pattern(current_pattern).window(current_row, visible_rows);
        PatternSnapshot {
            current_row,
            current_pattern,
            num_channels,
            channel_volumes,
            rows,
        }
    }

    /// Pattern window for a position that came from somewhere else, usually
    /// the sync log. Does not touch the decoder's levels.
    pub fn pattern_view(
        &self,
        pattern: usize,
        row: usize,
        visible_rows: usize,
        channel_volumes: Vec<f32>,
    ) -> PatternSnapshot {
        let mut inner = self.lock();
        let num_channels = inner.decoder.as_deref().map_or(0, |d| d.num_channels());
        let rows = inner.pattern(pattern).window(row, visible_rows);
        PatternSnapshot {
            current_row: row,
            current_pattern: pattern,
            num_channels,
            channel_volumes,
            rows,
        }
    }

    pub fn row_instruments(&self, pattern: usize, row: usize) -> Vec<u8> {
        self.lock().pattern(pattern).instruments_on_row(row)
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        let inner = self.lock();
        match inner.decoder.as_deref() {
            Some(d) => instruments::list(&d.instrument_names(), &d.sample_names()),
            None => Vec::new(),
        }
    }

    /// Drop the decoder and every cache with it.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.decoder.is_some() {
            tracing::info!("module closed");
        }
        *inner = Inner::default();
    }
}
