use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use super::app::App;
use super::palette::{self, fg};
use super::view_model::{
    CHIPS_PER_LINE, CONTROLS, ChipState, MAX_CHIPS, chip_label, format_cell, info_pairs,
    instrument_lines, pattern_header, title_line, vu_glyph, vu_level,
};

const VU_LABELS: [&str; 3] = ["VU▲", "VU│", "VU▼"];
const EMPTY_CELL: &str = "             ";

pub(crate) fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Length(instrument_lines(app.instruments.len())),
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    f.render_widget(Paragraph::new(header_lines(app)), chunks[0]);
    f.render_widget(Paragraph::new(instrument_panel(app)), chunks[2]);
    f.render_widget(Paragraph::new(vu_lines(app)), chunks[4]);
    f.render_widget(Paragraph::new(pattern_lines(app)), chunks[6]);
    f.render_widget(
        Paragraph::new(Line::styled(CONTROLS, fg(palette::CONTROLS))),
        chunks[7],
    );

    if let Some(err) = app.error.as_deref() {
        let area = centered_rect(70, 30, f.area());
        f.render_widget(Clear, area);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(fg(palette::BORDER))
            .title("Could not play");
        let text = vec![
            Line::from(err.to_string()),
            Line::from(""),
            Line::styled("press q to quit", fg(palette::CONTROLS)),
        ];
        f.render_widget(
            Paragraph::new(text).block(block).wrap(Wrap { trim: false }),
            area,
        );
    }

    if app.logs_open {
        let area = centered_rect(90, 80, f.area());
        f.render_widget(Clear, area);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(fg(palette::BORDER))
            .title("Logs (l/Esc to close)");
        let height = block.inner(area).height as usize;
        let start = app.logs.len().saturating_sub(height);
        let mut items: Vec<ListItem> = app
            .logs
            .iter()
            .skip(start)
            .map(|line| ListItem::new(line.clone()))
            .collect();
        if items.is_empty() {
            items.push(ListItem::new("<no logs>"));
        }
        f.render_widget(List::new(items).block(block), area);
    }
}

fn header_lines(app: &App) -> Vec<Line<'static>> {
    let mut title = vec![Span::styled(
        title_line(&app.metadata, &app.filename),
        palette::title(),
    )];
    if app.is_paused() {
        title.push(Span::styled("  [paused]", fg(palette::INFO_LABEL)));
    }

    let mut info = Vec::new();
    for (idx, (label, value)) in info_pairs(&app.metadata, app.current_time, app.stereo_separation)
        .into_iter()
        .enumerate()
    {
        if idx > 0 {
            info.push(Span::raw("  "));
        }
        info.push(Span::styled(label, fg(palette::INFO_LABEL)));
        info.push(Span::raw(" "));
        info.push(Span::styled(value, fg(palette::INFO_VALUE)));
    }
    vec![Line::from(title), Line::from(info)]
}

fn instrument_panel(app: &App) -> Vec<Line<'static>> {
    let label = fg(palette::INFO_LABEL).add_modifier(Modifier::BOLD);
    if app.instruments.is_empty() {
        return vec![Line::styled("♪ Instruments: (none)", label)];
    }

    let mut lines = vec![Line::styled("♪ Instruments:", label)];
    let shown = &app.instruments[..app.instruments.len().min(MAX_CHIPS)];
    for chunk in shown.chunks(CHIPS_PER_LINE) {
        let mut spans = vec![Span::raw("  ")];
        for (idx, inst) in chunk.iter().enumerate() {
            if idx > 0 {
                spans.push(Span::raw(" "));
            }
            let state = app.active.state(inst.id);
            let style = match state {
                ChipState::Active => fg(palette::NOTE)
                    .bg(palette::CURRENT_ROW_BG)
                    .add_modifier(Modifier::BOLD),
                ChipState::Fading => fg(palette::INFO_VALUE),
                ChipState::Idle => fg(palette::ROW_NUMBER),
            };
            spans.push(Span::styled(
                format!(" {}{} ", state.marker(), chip_label(inst)),
                style,
            ));
        }
        lines.push(Line::from(spans));
    }
    lines
}

fn vu_style(level: u8, row: usize, muted: bool) -> Style {
    if muted {
        return fg(palette::MUTED);
    }
    let high = fg(palette::INFO_VALUE).add_modifier(Modifier::BOLD);
    match row {
        0 if level >= 9 => fg(palette::CURRENT_ROW).add_modifier(Modifier::BOLD),
        0 | 1 if level >= 6 => high,
        _ => fg(palette::NOTE),
    }
}

fn vu_lines(app: &App) -> Vec<Line<'static>> {
    let levels = app.vu.levels();
    if levels.is_empty() {
        return Vec::new();
    }
    VU_LABELS
        .iter()
        .enumerate()
        .map(|(row, label)| {
            let mut spans = vec![
                Span::styled(format!("{label:<4}"), fg(palette::INFO_LABEL)),
                Span::raw(" │"),
            ];
            for (ch, &volume) in levels.iter().enumerate() {
                let muted = app.muted.get(ch).copied().unwrap_or(false);
                let level = vu_level(volume);
                spans.push(Span::raw("      "));
                spans.push(Span::styled(
                    vu_glyph(level, row).to_string(),
                    vu_style(level, row, muted),
                ));
                spans.push(Span::raw("       "));
                spans.push(Span::raw(" │"));
            }
            Line::from(spans)
        })
        .collect()
}

fn pattern_lines(app: &App) -> Vec<Line<'static>> {
    let snap = &app.snapshot;
    if snap.rows.is_empty() {
        let text = if app.session.is_none() && app.error.is_none() {
            format!("Loading {}...", app.filename)
        } else {
            "No pattern data available".to_string()
        };
        return vec![Line::styled(text, fg(palette::INFO_LABEL))];
    }

    let header = pattern_header(snap.num_channels);
    let width = header.chars().count();
    let mut lines = vec![
        Line::styled(header, Style::default().add_modifier(Modifier::BOLD)),
        Line::styled("─".repeat(width), fg(palette::BORDER)),
    ];

    for row in &snap.rows {
        let current = !row.is_placeholder() && row.row_number == snap.current_row as i32;
        let sep = palette::cell(palette::ROW_NUMBER, false, current);
        let row_style = if current {
            fg(palette::CURRENT_ROW)
                .bg(palette::CURRENT_ROW_BG)
                .add_modifier(Modifier::BOLD)
        } else {
            fg(palette::ROW_NUMBER)
        };

        let number = if row.is_placeholder() {
            "    ".to_string()
        } else {
            format!("{:04X}", row.row_number)
        };
        let mut spans = vec![Span::styled(number, row_style), Span::styled(" │ ", sep)];

        for ch in 0..snap.num_channels {
            if ch > 0 {
                spans.push(Span::styled(" │ ", sep));
            }
            let Some(cell) = row.channels.get(ch) else {
                spans.push(Span::styled(EMPTY_CELL, sep));
                continue;
            };
            let muted = app.muted.get(ch).copied().unwrap_or(false);
            let [note, instrument, volume, effect] = format_cell(cell);
            spans.push(Span::styled(note, palette::cell(palette::NOTE, muted, current)));
            spans.push(Span::styled(" ", sep));
            spans.push(Span::styled(
                instrument,
                palette::cell(palette::INSTRUMENT, muted, current),
            ));
            spans.push(Span::styled(" ", sep));
            spans.push(Span::styled(volume, palette::cell(palette::VOLUME, muted, current)));
            spans.push(Span::styled(" ", sep));
            spans.push(Span::styled(effect, palette::cell(palette::EFFECT, muted, current)));
        }
        spans.push(Span::styled(" │", sep));
        if current {
            spans.push(Span::styled(
                format!(" Pat: {:02X}", snap.current_pattern),
                row_style,
            ));
        }
        lines.push(Line::from(spans));
    }
    lines
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ratatui::{Terminal, backend::TestBackend};
    use tracker_player::instruments::{Instrument, InstrumentKind};
    use tracker_player::snapshot::{PatternCell, PatternRow, PatternSnapshot};

    use super::*;

    fn screen(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|line| line.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn app() -> App {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        App::new(Path::new("tunes/axel.mod"), 50, 40, rx)
    }

    #[test]
    fn loading_screen() {
        let out = screen(&app());
        assert!(out.contains("♪ Unknown"));
        assert!(out.contains("Loading axel.mod..."));
        assert!(out.contains("♪ Instruments: (none)"));
        assert!(out.contains("[q] quit"));
    }

    #[test]
    fn pattern_and_meters() {
        let mut app = app();
        app.metadata.title = "axel f".to_string();
        app.metadata.channels = 2;
        app.instruments = vec![Instrument {
            id: 1,
            name: "lead".to_string(),
            kind: InstrumentKind::Sample,
        }];
        app.active.update(&[1]);
        let cell = PatternCell {
            note: 49,
            instrument: 1,
            volume: 0,
            effect: 0x0C40,
        };
        app.snapshot = PatternSnapshot {
            current_row: 0,
            current_pattern: 3,
            num_channels: 2,
            channel_volumes: vec![1.0, 0.0],
            rows: vec![
                PatternRow::placeholder(-1),
                PatternRow {
                    row_number: 0,
                    channels: vec![cell, PatternCell::default()],
                },
                PatternRow {
                    row_number: 1,
                    channels: vec![PatternCell::default(); 2],
                },
            ],
        };
        app.vu.update(&[1.0, 0.0], 2);
        app.muted = vec![false, true];

        let out = screen(&app);
        assert!(out.contains("♪ axel f"));
        assert!(out.contains("Stereo: 50%"));
        assert!(out.contains("★01:lead"));
        assert!(out.contains(" Row │ Ch1"));
        assert!(out.contains("0000 │ C-4 01 .. C40 │ ... .. .. ... │ Pat: 03"));
        assert!(out.contains("0001 │ ... .. .. ... │"));
        assert!(out.contains("VU▲  │      █"));
    }

    #[test]
    fn load_error_popup() {
        let mut app = app();
        app.error = Some("unsupported format".to_string());
        let out = screen(&app);
        assert!(out.contains("unsupported format"));
        assert!(out.contains("No pattern data available"));
    }

    #[test]
    fn log_panel() {
        let mut app = app();
        app.logs.push_back(" INFO modtui: hello".to_string());
        app.logs_open = true;
        let out = screen(&app);
        assert!(out.contains("Logs (l/Esc to close)"));
        assert!(out.contains("modtui: hello"));
    }
}
