//! Tracing setup.
//!
//! While the TUI owns the terminal, log events are formatted into single
//! lines and handed to the log panel over a channel. Headless runs log to
//! stderr.

use std::fmt::Write as _;

use crossbeam_channel::{Receiver, Sender};
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const PANEL_BACKLOG: usize = 1024;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tracker_player=info,modtui=info"))
}

pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Install the panel layer and return the receiving end for the UI.
pub fn init_panel() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(PANEL_BACKLOG);
    tracing_subscriber::registry()
        .with(env_filter())
        .with(PanelLayer::new(tx))
        .init();
    rx
}

/// Formats each event as `LEVEL target: message key=value ...`.
pub struct PanelLayer {
    tx: Sender<String>,
}

impl PanelLayer {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for PanelLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        let mut line = format!(
            "{:>5} {}: {}",
            meta.level(),
            meta.target(),
            visitor.message.unwrap_or_default()
        );
        for field in visitor.fields {
            let _ = write!(line, " {field}");
        }
        // A full panel drops lines rather than stall the audio threads.
        let _ = self.tx.try_send(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(formatted.trim_matches('"').to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), formatted));
        }
    }
}
