//! ProTracker-family MOD layout.
//!
//! Header: 20-byte title, 31 sample headers of 30 bytes, song length,
//! restart byte, 128-entry order table and a 4-byte tag naming the channel
//! count. Pattern data (64 rows of 4-byte cells per channel) follows, then
//! raw signed 8-bit sample data.

use crate::error::LoadError;

pub(super) const ROWS_PER_PATTERN: usize = 64;
pub(super) const SAMPLE_SLOTS: usize = 31;

const TITLE_LEN: usize = 20;
const SAMPLE_HEADER_LEN: usize = 30;
const SONG_LENGTH_OFFSET: usize = 950;
const ORDER_TABLE_OFFSET: usize = 952;
const ORDER_TABLE_LEN: usize = 128;
const TAG_OFFSET: usize = 1080;
const HEADER_LEN: usize = 1084;
const CELL_LEN: usize = 4;

/// Amiga periods at finetune 0, three octaves from the lowest C.
pub(super) const PERIODS: [u16; 36] = [
    856, 808, 762, 720, 678, 640, 604, 570, 538, 508, 480, 453, //
    428, 404, 381, 360, 339, 320, 302, 285, 269, 254, 240, 226, //
    214, 202, 190, 180, 170, 160, 151, 143, 135, 127, 120, 113,
];

/// Display note number of `PERIODS[0]` (C-4 in 1-based note numbering).
const FIRST_NOTE: u8 = 49;

pub(super) struct Sample {
    pub name: String,
    pub data: Vec<i8>,
    /// Signed finetune in eighths of a semitone.
    pub finetune: i8,
    pub volume: u8,
    pub loop_start: usize,
    pub loop_len: usize,
}

impl Sample {
    pub fn has_loop(&self) -> bool {
        self.loop_len > 2
    }

    pub fn loop_end(&self) -> usize {
        self.loop_start + self.loop_len
    }
}

/// One pattern cell as stored in the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct Note {
    pub period: u16,
    pub sample: u8,
    pub effect: u8,
    pub param: u8,
}

pub(super) struct ModFile {
    pub title: String,
    pub kind: String,
    pub channels: usize,
    pub samples: Vec<Sample>,
    pub orders: Vec<u8>,
    patterns: Vec<Vec<Note>>,
}

impl ModFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < HEADER_LEN {
            return Err(LoadError::TooShort(bytes.len()));
        }

        let tag = [
            bytes[TAG_OFFSET],
            bytes[TAG_OFFSET + 1],
            bytes[TAG_OFFSET + 2],
            bytes[TAG_OFFSET + 3],
        ];
        let channels = channels_for_tag(&tag).ok_or(LoadError::Unrecognized)?;

        let song_length = usize::from(bytes[SONG_LENGTH_OFFSET]).min(ORDER_TABLE_LEN);
        if song_length == 0 {
            return Err(LoadError::NoOrders);
        }
        let order_table = &bytes[ORDER_TABLE_OFFSET..ORDER_TABLE_OFFSET + ORDER_TABLE_LEN];
        let orders = order_table[..song_length].to_vec();
        // Trackers store every pattern referenced anywhere in the table,
        // including entries past the song length.
        let num_patterns = order_table.iter().copied().max().map_or(0, usize::from) + 1;

        let pattern_len = ROWS_PER_PATTERN * channels * CELL_LEN;
        let expected = HEADER_LEN + num_patterns * pattern_len;
        if bytes.len() < expected {
            return Err(LoadError::Truncated {
                expected,
                found: bytes.len(),
            });
        }

        let patterns = bytes[HEADER_LEN..expected]
            .chunks_exact(pattern_len)
            .map(|raw| raw.chunks_exact(CELL_LEN).map(decode_cell).collect())
            .collect();

        let mut samples = Vec::with_capacity(SAMPLE_SLOTS);
        let mut data_offset = expected;
        for slot in 0..SAMPLE_SLOTS {
            let header = &bytes[TITLE_LEN + slot * SAMPLE_HEADER_LEN..][..SAMPLE_HEADER_LEN];
            let length = word_len(header[22], header[23]);
            let available = bytes.len().saturating_sub(data_offset).min(length);
            let data: Vec<i8> = bytes[data_offset..data_offset + available]
                .iter()
                .map(|&b| b as i8)
                .collect();
            data_offset += available;

            let mut loop_start = word_len(header[26], header[27]);
            let mut loop_len = word_len(header[28], header[29]);
            if loop_start >= data.len() {
                loop_start = 0;
                loop_len = 0;
            }
            loop_len = loop_len.min(data.len() - loop_start);

            samples.push(Sample {
                name: latin1(&header[..22]),
                data,
                finetune: finetune(header[24]),
                volume: header[25].min(64),
                loop_start,
                loop_len,
            });
        }

        Ok(Self {
            title: latin1(&bytes[..TITLE_LEN]),
            kind: format!("ProTracker MOD ({})", latin1(&tag)),
            channels,
            samples,
            orders,
            patterns,
        })
    }

    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn note(&self, pattern: usize, row: usize, channel: usize) -> Note {
        if row >= ROWS_PER_PATTERN || channel >= self.channels {
            return Note::default();
        }
        self.patterns
            .get(pattern)
            .and_then(|cells| cells.get(row * self.channels + channel))
            .copied()
            .unwrap_or_default()
    }
}

fn channels_for_tag(tag: &[u8; 4]) -> Option<usize> {
    let channels = match tag {
        b"M.K." | b"M!K!" | b"M&K!" | b"FLT4" | b"4CHN" | b"N.T." => 4,
        b"6CHN" => 6,
        b"8CHN" | b"OCTA" | b"CD81" | b"FLT8" => 8,
        [d, b'C', b'H', b'N'] if d.is_ascii_digit() => usize::from(d - b'0'),
        [a, b, b'C', b'H'] if a.is_ascii_digit() && b.is_ascii_digit() => {
            usize::from(a - b'0') * 10 + usize::from(b - b'0')
        }
        _ => return None,
    };
    (1..=32).contains(&channels).then_some(channels)
}

fn decode_cell(raw: &[u8]) -> Note {
    Note {
        period: (u16::from(raw[0] & 0x0F) << 8) | u16::from(raw[1]),
        sample: (raw[0] & 0xF0) | (raw[2] >> 4),
        effect: raw[2] & 0x0F,
        param: raw[3],
    }
}

fn word_len(hi: u8, lo: u8) -> usize {
    usize::from(u16::from_be_bytes([hi, lo])) * 2
}

fn finetune(raw: u8) -> i8 {
    let nibble = (raw & 0x0F) as i8;
    if nibble > 7 { nibble - 16 } else { nibble }
}

fn latin1(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_control() { ' ' } else { char::from(b) })
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Display note number for an Amiga period, `0` when no note is present.
pub(super) fn note_number(period: u16) -> u8 {
    if period == 0 {
        return 0;
    }
    let nearest = PERIODS
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| p.abs_diff(period))
        .map_or(0, |(idx, _)| idx);
    FIRST_NOTE + nearest as u8
}
