//! Decoder seam.
//!
//! Everything above this module talks to a [`Decoder`]; the built-in
//! [`ModDecoder`] covers ProTracker-family files.

mod format;
mod mixer;
mod sequencer;

use std::path::Path;

use crate::config::Interpolation;
use crate::error::{LoadError, ParamError};
use crate::snapshot::PatternCell;

pub use sequencer::ModDecoder;

/// Static facts about a loaded module.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    pub title: String,
    pub artist: String,
    /// Long format name, e.g. `ProTracker MOD (M.K.)`.
    pub kind: String,
    pub duration_seconds: f64,
    pub channels: usize,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            title: "Unknown".to_string(),
            artist: String::new(),
            kind: "Unknown".to_string(),
            duration_seconds: 0.0,
            channels: 0,
        }
    }
}

/// A tracker decoding engine.
///
/// Implementations are not required to be re-entrant; callers serialise
/// every call (see [`crate::module::Module`]).
pub trait Decoder: Send {
    /// Render interleaved stereo frames into `out` at `sample_rate`.
    ///
    /// Returns frames written; `0` once the song has ended.
    fn read(&mut self, sample_rate: u32, out: &mut [i16]) -> usize;

    /// Render position in seconds.
    fn position_seconds(&self) -> f64;

    fn set_position_seconds(&mut self, seconds: f64);

    fn current_row(&self) -> usize;

    fn current_pattern(&self) -> usize;

    fn num_channels(&self) -> usize;

    fn num_patterns(&self) -> usize;

    /// Row count of `pattern`, `0` if it does not exist.
    fn pattern_num_rows(&self, pattern: usize) -> usize;

    fn pattern_cell(&self, pattern: usize, row: usize, channel: usize) -> PatternCell;

    /// Level of `channel` over the last rendered block, in `[0, 1]`.
    fn channel_vu(&self, channel: usize) -> f32;

    fn metadata(&self) -> Metadata;

    fn set_stereo_separation(&mut self, percent: i32) -> Result<(), ParamError>;

    fn set_interpolation(&mut self, quality: Interpolation) -> Result<(), ParamError>;

    fn is_channel_muted(&self, channel: usize) -> bool;

    fn set_channel_muted(&mut self, channel: usize, muted: bool);

    fn instrument_names(&self) -> Vec<String>;

    fn sample_names(&self) -> Vec<String>;
}

/// Read and decode a module file.
pub fn open(path: &Path) -> Result<Box<dyn Decoder>, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load(&bytes)
}

/// Decode a module held in memory.
pub fn load(bytes: &[u8]) -> Result<Box<dyn Decoder>, LoadError> {
    if let Some(name) = foreign_format(bytes) {
        return Err(LoadError::Unsupported(name));
    }
    let decoder = ModDecoder::from_bytes(bytes)?;
    let meta = decoder.metadata();
    tracing::info!(
        title = %meta.title,
        kind = %meta.kind,
        channels = meta.channels,
        duration_secs = meta.duration_seconds,
        "module decoded"
    );
    Ok(Box::new(decoder))
}

/// Recognise tracker formats the built-in engine does not play.
fn foreign_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"Extended Module: ") {
        Some("XM")
    } else if bytes.starts_with(b"IMPM") {
        Some("IT")
    } else if bytes.get(44..48) == Some(b"SCRM".as_slice()) {
        Some("S3M")
    } else if bytes.starts_with(b"MTM") {
        Some("MTM")
    } else {
        None
    }
}
