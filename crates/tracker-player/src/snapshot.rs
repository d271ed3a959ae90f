//! Pattern data as the display sees it.
//!
//! Patterns never change once a module is loaded, so each one is expanded
//! into a [`CachedPattern`] on first use and windows are cut from that.

use crate::decode::Decoder;

/// Note value for a note cut.
pub const NOTE_CUT: u8 = 254;
/// Note value for a key-off.
pub const NOTE_OFF: u8 = 255;

/// One channel of one row. Zero in any field means "empty".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatternCell {
    pub note: u8,
    pub instrument: u8,
    pub volume: u8,
    /// Effect command in the high byte, parameter in the low byte.
    pub effect: u16,
}

impl PatternCell {
    pub fn is_empty(&self) -> bool {
        *self == PatternCell::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternRow {
    /// May be negative or past the end for placeholder rows.
    pub row_number: i32,
    /// Empty for placeholder rows.
    pub channels: Vec<PatternCell>,
}

impl PatternRow {
    pub fn placeholder(row_number: i32) -> Self {
        Self {
            row_number,
            channels: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Every row of one pattern, fully expanded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CachedPattern {
    rows: Vec<PatternRow>,
}

impl CachedPattern {
    /// Read every cell of `pattern` from the decoder.
    pub fn materialize(decoder: &dyn Decoder, pattern: usize) -> Self {
        let channels = decoder.num_channels();
        let rows = (0..decoder.pattern_num_rows(pattern))
            .map(|row| PatternRow {
                row_number: row as i32,
                channels: (0..channels)
                    .map(|ch| decoder.pattern_cell(pattern, row, ch))
                    .collect(),
            })
            .collect();
        Self { rows }
    }

    /// Rows `current_row - visible_rows/2 ..= current_row + visible_rows/2`.
    ///
    /// Rows outside the pattern come back as placeholders keeping their
    /// out-of-range number.
    pub fn window(&self, current_row: usize, visible_rows: usize) -> Vec<PatternRow> {
        let half = (visible_rows / 2) as i64;
        let center = current_row as i64;
        (center - half..=center + half)
            .map(|n| {
                usize::try_from(n)
                    .ok()
                    .and_then(|idx| self.rows.get(idx))
                    .cloned()
                    .unwrap_or_else(|| PatternRow::placeholder(n as i32))
            })
            .collect()
    }

    /// Instruments triggered on `row`, in channel order, without repeats.
    pub fn instruments_on_row(&self, row: usize) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(r) = self.rows.get(row) {
            for cell in &r.channels {
                if cell.instrument > 0 && !out.contains(&cell.instrument) {
                    out.push(cell.instrument);
                }
            }
        }
        out
    }
}

/// What the pattern display needs for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatternSnapshot {
    pub current_row: usize,
    pub current_pattern: usize,
    pub num_channels: usize,
    pub channel_volumes: Vec<f32>,
    pub rows: Vec<PatternRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(instrument: u8) -> PatternCell {
        PatternCell {
            note: 49,
            instrument,
            volume: 0,
            effect: 0,
        }
    }

    fn pattern(rows: usize) -> CachedPattern {
        CachedPattern {
            rows: (0..rows)
                .map(|r| PatternRow {
                    row_number: r as i32,
                    channels: vec![cell(r as u8 + 1), PatternCell::default()],
                })
                .collect(),
        }
    }

    #[test]
    fn window_pads_past_the_end() {
        let window = pattern(8).window(10, 5);
        let numbers: Vec<i32> = window.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![8, 9, 10, 11, 12]);
        assert!(window.iter().all(PatternRow::is_placeholder));
    }

    #[test]
    fn window_straddling_the_end_keeps_real_rows() {
        let window = pattern(12).window(10, 5);
        let numbers: Vec<i32> = window.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![8, 9, 10, 11, 12]);
        assert!(!window[0].is_placeholder());
        assert!(!window[3].is_placeholder());
        assert!(window[4].is_placeholder());
        assert_eq!(window[0].channels[0].instrument, 9);
    }

    #[test]
    fn window_pads_before_the_start() {
        let window = pattern(64).window(0, 5);
        let numbers: Vec<i32> = window.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![-2, -1, 0, 1, 2]);
        assert!(window[0].is_placeholder() && window[1].is_placeholder());
        assert_eq!(window[2].channels.len(), 2);
    }

    #[test]
    fn even_window_sizes_still_center() {
        assert_eq!(pattern(64).window(20, 4).len(), 5);
        assert_eq!(pattern(64).window(20, 1).len(), 1);
    }

    #[test]
    fn instruments_on_row_skip_empty_and_repeats() {
        let mut p = pattern(2);
        p.rows[1].channels = vec![cell(3), PatternCell::default(), cell(3), cell(7)];
        assert_eq!(p.instruments_on_row(1), vec![3, 7]);
        assert!(p.instruments_on_row(40).is_empty());
    }

    #[test]
    fn empty_cell_detection() {
        assert!(PatternCell::default().is_empty());
        assert!(!cell(0).is_empty());
    }
}
