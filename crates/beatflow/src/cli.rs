//! Command-line argument parsing.

use beatflow_core::LogConfig;
use clap::Parser;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "beatflow")]
#[command(about = "Live audio band energies and per-band beat detection", long_about = None)]
pub struct Args {
    /// Processor configuration (JSON). Edits are applied live.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Capture from the first input device whose name contains this text
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Analysis ticks per second
    #[arg(long, value_name = "HZ", default_value = "60")]
    pub fps: u32,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Also write logs to a timestamped file in this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Print one JSON frame per report instead of a text summary
    #[arg(long)]
    pub json: bool,

    /// Seconds between reports
    #[arg(long, value_name = "SECONDS", default_value = "0.5")]
    pub report_interval: f32,
}

impl Args {
    /// Logging configuration derived from the flags
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig {
            level: self.log_level.clone(),
            ..LogConfig::default()
        };
        if let Some(dir) = &self.log_dir {
            config.log_path = dir.clone();
            config.file_output = true;
        }
        config
    }

    /// Seconds per analysis tick
    pub fn tick_interval(&self) -> f32 {
        1.0 / self.fps.clamp(1, 1000) as f32
    }
}
