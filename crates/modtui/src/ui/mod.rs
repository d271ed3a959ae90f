//! Ratatui player screen.
//!
//! Keys:
//! - Space: pause/resume
//! - `[` / `]`: stereo separation down/up by 10%
//! - 1-9, 0, -, =: mute/unmute channels 1-12
//! - Shift + the same keys: solo channel
//! - l: toggle log panel
//! - q, Ctrl-C: quit

mod app;
mod palette;
mod render;
mod view_model;

pub(crate) use app::run_tui;
