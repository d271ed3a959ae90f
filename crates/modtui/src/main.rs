//! `modtui`: play tracker modules in the terminal.
//!
//! Shows the pattern being heard, channel VU meters and the instruments in
//! use. Channels can be muted or soloed while the song plays.

mod config;
mod headless;
mod logging;
mod ui;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tracker_player::config::Interpolation;
use tracker_player::output::device;

use crate::config::{AppConfig, Overrides};

#[derive(Parser, Debug)]
#[command(name = "modtui", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Module file to play.
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Stereo separation in percent (0-200).
    #[arg(long, value_parser = clap::value_parser!(i32).range(0..=200))]
    separation: Option<i32>,

    /// Interpolation: default, none, linear, cubic or sinc.
    #[arg(long)]
    interpolation: Option<Interpolation>,

    /// Output device (case-insensitive name substring).
    #[arg(long)]
    device: Option<String>,

    /// Output buffer size in milliseconds.
    #[arg(long)]
    buffer_ms: Option<u32>,

    /// Print output devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Play without the terminal UI, logging to stderr.
    #[arg(long)]
    headless: bool,

    /// Settings file (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().or_else(AppConfig::default_path);
    let mut settings = match &config_path {
        Some(path) => AppConfig::load_or_default(path)?,
        None => AppConfig::default(),
    };

    if args.list_devices {
        logging::init_stderr();
        let host = cpal::default_host();
        let default = device::default_device_name(&host);
        for (idx, name) in device::list_devices(&host)?.iter().enumerate() {
            let marker = if default.as_deref() == Some(name.as_str()) {
                " (default)"
            } else {
                ""
            };
            println!("#{idx}: {name}{marker}");
        }
        return Ok(());
    }

    let Some(path) = args.file.clone() else {
        bail!("no module file given");
    };
    if !path.is_file() {
        bail!("file not found: {}", path.display());
    }

    let overrides = Overrides {
        stereo_separation: args.separation,
        interpolation: args.interpolation,
        buffer_ms: args.buffer_ms,
        device: args.device.clone(),
    };
    let (playback, output) = settings.resolve(&overrides)?;

    let separation = if args.headless {
        logging::init_stderr();
        headless::run(&path, &playback, &output)?;
        playback.stereo_separation
    } else {
        let log_rx = logging::init_panel();
        ui::run_tui(path.clone(), playback, output, log_rx)?
    };

    if let Some(config_path) = config_path {
        settings.stereo_separation = Some(separation);
        settings.last_file = Some(path.display().to_string());
        if let Err(err) = settings.save(&config_path) {
            tracing::debug!("settings not saved: {err:#}");
        }
    }
    Ok(())
}
