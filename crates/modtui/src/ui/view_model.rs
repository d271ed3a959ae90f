//! Display state and text formatting that does not depend on ratatui.

use std::collections::BTreeMap;

use tracker_player::decode::Metadata;
use tracker_player::instruments::Instrument;
use tracker_player::snapshot::{NOTE_CUT, NOTE_OFF, PatternCell};

pub(crate) const CONTROLS: &str =
    "[q] quit  [space] pause  [[ ]] stereo  [1-9,0,-,=] mute  [Shift+] solo  [l] logs";

/// Lines used by everything except the pattern rows.
const CHROME_LINES: u16 = 16;
const MIN_VISIBLE_ROWS: usize = 5;

pub(crate) const MAX_CHIPS: usize = 24;
pub(crate) const CHIPS_PER_LINE: usize = 8;
const CHIP_NAME_MAX: usize = 12;

const VU_DECAY: f32 = 0.92;
const VU_FLOOR: f32 = 0.001;

const TRIGGER_BRIGHTNESS: i32 = 100;
const FADE_STEP: i32 = 10;
const ACTIVE_THRESHOLD: i32 = 60;

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

/// Pattern rows that fit in a terminal `height` lines tall. Always odd so
/// the current row sits in the middle.
pub(crate) fn visible_rows(height: u16) -> usize {
    let rows = (height.saturating_sub(CHROME_LINES) as usize).max(MIN_VISIBLE_ROWS);
    if rows % 2 == 0 { rows + 1 } else { rows }
}

pub(crate) fn format_note(note: u8) -> String {
    match note {
        0 | NOTE_OFF => "...".to_string(),
        NOTE_CUT => "===".to_string(),
        1..=120 => {
            let idx = note - 1;
            format!("{}{}", NOTE_NAMES[(idx % 12) as usize], idx / 12)
        }
        _ => "...".to_string(),
    }
}

pub(crate) fn format_instrument(instrument: u8) -> String {
    if instrument == 0 {
        "..".to_string()
    } else {
        format!("{instrument:02X}")
    }
}

pub(crate) fn format_volume(volume: u8) -> String {
    if volume == 0 {
        "..".to_string()
    } else {
        format!("{volume:02X}")
    }
}

pub(crate) fn format_effect(effect: u16) -> String {
    if effect == 0 {
        "...".to_string()
    } else {
        format!("{effect:03X}")
    }
}

/// `NNN II VV EEE`, 13 columns.
pub(crate) fn format_cell(cell: &PatternCell) -> [String; 4] {
    [
        format_note(cell.note),
        format_instrument(cell.instrument),
        format_volume(cell.volume),
        format_effect(cell.effect),
    ]
}

pub(crate) fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

pub(crate) fn pattern_header(channels: usize) -> String {
    let mut header = format!("{:>4} │", "Row");
    for ch in 0..channels {
        header.push_str(&format!(" Ch{:<11} │", ch + 1));
    }
    header
}

pub(crate) fn title_line(meta: &Metadata, filename: &str) -> String {
    let title = if meta.title.trim().is_empty() {
        filename
    } else {
        meta.title.as_str()
    };
    format!("♪ {title}")
}

/// Label/value pairs for the info line, artist first when there is one.
pub(crate) fn info_pairs(
    meta: &Metadata,
    current_time: f64,
    stereo_separation: i32,
) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::with_capacity(5);
    if !meta.artist.is_empty() {
        pairs.push(("Artist:", meta.artist.clone()));
    }
    pairs.push(("Format:", meta.kind.clone()));
    pairs.push((
        "Time:",
        format!(
            "{} / {}",
            format_time(current_time),
            format_time(meta.duration_seconds)
        ),
    ));
    pairs.push(("Ch:", meta.channels.to_string()));
    pairs.push(("Stereo:", format!("{stereo_separation}%")));
    pairs
}

/// Meter level 0-9 for a linear channel volume.
pub(crate) fn vu_level(volume: f32) -> u8 {
    let v = volume.clamp(0.0, 1.0);
    let mut perceived = v * v;
    if perceived < 0.1 {
        perceived *= 1.5;
    }
    ((perceived * 9.0) as u8).min(9)
}

/// Glyph for one of the three meter rows, 0 being the top.
pub(crate) fn vu_glyph(level: u8, row: usize) -> char {
    match row {
        0 => match level {
            7.. => '█',
            6 => '▄',
            _ => ' ',
        },
        1 => match level {
            6.. => '█',
            5 => '▇',
            4 => '▄',
            3 => '▂',
            _ => ' ',
        },
        _ => match level {
            3.. => '█',
            2 => '▄',
            1 => '▂',
            _ => ' ',
        },
    }
}

/// Smoothed per-channel levels: rise at once, fall off geometrically.
#[derive(Debug, Default)]
pub(crate) struct VuMeter {
    levels: Vec<f32>,
}

impl VuMeter {
    /// Missing entries in `volumes` count as silence.
    pub(crate) fn update(&mut self, volumes: &[f32], channels: usize) {
        self.levels.resize(channels, 0.0);
        for (ch, level) in self.levels.iter_mut().enumerate() {
            let target = volumes.get(ch).copied().unwrap_or(0.0);
            if target > *level {
                *level = target;
            } else {
                *level *= VU_DECAY;
                if *level < VU_FLOOR {
                    *level = 0.0;
                }
            }
        }
    }

    pub(crate) fn levels(&self) -> &[f32] {
        &self.levels
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChipState {
    Active,
    Fading,
    Idle,
}

impl ChipState {
    pub(crate) fn marker(self) -> &'static str {
        match self {
            ChipState::Active => "★",
            ChipState::Fading => "○",
            ChipState::Idle => "·",
        }
    }
}

/// Instruments heard recently, with a brightness that fades every tick.
#[derive(Debug, Default)]
pub(crate) struct ActiveInstruments {
    brightness: BTreeMap<u8, i32>,
}

impl ActiveInstruments {
    pub(crate) fn update(&mut self, triggered: &[u8]) {
        self.brightness.retain(|_, b| {
            *b -= FADE_STEP;
            *b > 0
        });
        for &id in triggered {
            self.brightness.insert(id, TRIGGER_BRIGHTNESS);
        }
    }

    pub(crate) fn state(&self, id: u8) -> ChipState {
        match self.brightness.get(&id) {
            Some(&b) if b > ACTIVE_THRESHOLD => ChipState::Active,
            Some(_) => ChipState::Fading,
            None => ChipState::Idle,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.brightness.clear();
    }
}

/// `ID:name`, long names cut to fit.
pub(crate) fn chip_label(instrument: &Instrument) -> String {
    let name = &instrument.name;
    if name.chars().count() > CHIP_NAME_MAX {
        let short: String = name.chars().take(CHIP_NAME_MAX - 3).collect();
        format!("{:02X}:{short}...", instrument.id)
    } else {
        format!("{:02X}:{name}", instrument.id)
    }
}

/// Lines the instrument panel takes, header included.
pub(crate) fn instrument_lines(count: usize) -> u16 {
    let shown = count.min(MAX_CHIPS);
    1 + shown.div_ceil(CHIPS_PER_LINE) as u16
}
