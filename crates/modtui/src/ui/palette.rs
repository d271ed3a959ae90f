use ratatui::style::{Color, Modifier, Style};

pub(crate) const TITLE: Color = Color::Rgb(0xEA, 0xE0, 0xCF);
pub(crate) const INFO_LABEL: Color = Color::Rgb(0x94, 0xA3, 0xB8);
pub(crate) const INFO_VALUE: Color = Color::Rgb(0xE2, 0xE8, 0xF0);
pub(crate) const ROW_NUMBER: Color = Color::Rgb(0x64, 0x74, 0x8B);
pub(crate) const CURRENT_ROW: Color = Color::Rgb(0xEA, 0xE0, 0xCF);
pub(crate) const CURRENT_ROW_BG: Color = Color::Rgb(0x33, 0x41, 0x55);
pub(crate) const NOTE: Color = Color::Rgb(0xE2, 0xE8, 0xF0);
pub(crate) const INSTRUMENT: Color = Color::Rgb(0xCB, 0xD5, 0xE1);
pub(crate) const VOLUME: Color = Color::Rgb(0x94, 0xA3, 0xB8);
pub(crate) const EFFECT: Color = Color::Rgb(0x64, 0x74, 0x8B);
pub(crate) const BORDER: Color = Color::Rgb(0x47, 0x55, 0x69);
pub(crate) const CONTROLS: Color = Color::Rgb(0x94, 0xA3, 0xB8);
pub(crate) const MUTED: Color = Color::Indexed(240);

pub(crate) fn fg(color: Color) -> Style {
    Style::default().fg(color)
}

pub(crate) fn title() -> Style {
    fg(TITLE).add_modifier(Modifier::BOLD)
}

/// Style for one pattern cell field: muted channels are dimmed, the current
/// row gets a background.
pub(crate) fn cell(color: Color, muted: bool, current: bool) -> Style {
    let mut style = if muted { fg(MUTED) } else { fg(color) };
    if current {
        style = style.bg(CURRENT_ROW_BG);
        if !muted {
            style = style.add_modifier(Modifier::BOLD);
        }
    }
    style
}
