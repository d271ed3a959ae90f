//! Instrument listing for the side panel.

use std::fmt;

/// Entries beyond this are not listed.
pub const MAX_INSTRUMENTS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentKind {
    Instrument,
    Sample,
}

impl InstrumentKind {
    pub fn label(self) -> &'static str {
        match self {
            InstrumentKind::Instrument => "Inst",
            InstrumentKind::Sample => "Samp",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instrument {
    /// 1-based, matching the instrument column of pattern cells.
    pub id: u8,
    pub name: String,
    pub kind: InstrumentKind,
}

/// Instruments when the module defines any, samples otherwise.
pub fn list(instrument_names: &[String], sample_names: &[String]) -> Vec<Instrument> {
    let (names, kind) = if instrument_names.is_empty() {
        (sample_names, InstrumentKind::Sample)
    } else {
        (instrument_names, InstrumentKind::Instrument)
    };

    names
        .iter()
        .take(MAX_INSTRUMENTS)
        .enumerate()
        .map(|(idx, raw)| {
            let id = (idx + 1) as u8;
            let trimmed = raw.trim();
            let name = if trimmed.is_empty() {
                match kind {
                    InstrumentKind::Instrument => format!("Instrument {id:02X}"),
                    InstrumentKind::Sample => format!("Sample {id:02X}"),
                }
            } else {
                trimmed.to_string()
            };
            Instrument { id, name, kind }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn samples_listed_when_no_instruments() {
        let list = list(&[], &names(&["kick", "  ", "snare "]));
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].id, 1);
        assert_eq!(list[0].kind, InstrumentKind::Sample);
        assert_eq!(list[1].name, "Sample 02");
        assert_eq!(list[2].name, "snare");
    }

    #[test]
    fn instruments_take_priority() {
        let list = list(&names(&["lead", ""]), &names(&["a", "b", "c"]));
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].name, "Instrument 02");
        assert_eq!(list[0].kind.label(), "Inst");
    }

    #[test]
    fn list_is_capped() {
        let many: Vec<String> = (0..130).map(|_| String::new()).collect();
        let list = list(&many, &[]);
        assert_eq!(list.len(), MAX_INSTRUMENTS);
        assert_eq!(list.last().map(|i| i.name.as_str()), Some("Instrument 64"));
    }
}
