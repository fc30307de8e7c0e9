//! BeatFlow - live audio band and beat analysis
//!
//! Captures an input device, runs the beatflow-core pipeline at a fixed
//! display rate and reports band energies and beats on stdout.

use anyhow::{Context, Result};
use beatflow_core::{AudioProcessor, FftSpectrumSource, ProcessorConfig, WindowFunction};
use clap::Parser;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

mod capture;
mod cli;
mod config_watch;
mod logging_setup;

use capture::CpalCapture;
use cli::Args;
use config_watch::ConfigWatcher;

/// Seconds between attempts to reopen a lost capture device
const RECONNECT_INTERVAL: f32 = 1.0;

/// Characters for the text meter, quietest first
const METER: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging_setup::init(&args.log_config())?;

    if args.list_devices {
        return list_devices();
    }

    info!("==========================================");
    info!("===      BeatFlow Session Started      ===");
    info!("==========================================");

    let config = match &args.config {
        Some(path) => config_watch::load_config(path)?,
        None => ProcessorConfig::default(),
    };
    let watcher = match &args.config {
        Some(path) => match ConfigWatcher::new(path) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Live configuration reload disabled: {:#}", e);
                None
            }
        },
        None => None,
    };

    let opened = CpalCapture::new(args.device.as_deref()).context("Failed to open audio input")?;
    let sample_rate = opened.sample_rate() as f32;
    let mut capture = Some(opened);

    let mut source =
        FftSpectrumSource::new(sample_rate, config.sample_count, WindowFunction::default());
    let mut processor = AudioProcessor::new(config, sample_rate);
    processor.activate();

    run(&args, &mut processor, &mut source, &mut capture, watcher.as_ref())
}

fn list_devices() -> Result<()> {
    match CpalCapture::list_devices()? {
        Some(devices) => {
            for (i, name) in devices.iter().enumerate() {
                println!("[{}] {}", i, name);
            }
        }
        None => println!("No input devices found"),
    }
    Ok(())
}

fn run(
    args: &Args,
    processor: &mut AudioProcessor,
    source: &mut FftSpectrumSource,
    capture: &mut Option<CpalCapture>,
    watcher: Option<&ConfigWatcher>,
) -> Result<()> {
    let tick = Duration::from_secs_f32(args.tick_interval());
    let stdout = std::io::stdout();
    let mut last = Instant::now();
    let mut since_report = 0.0f32;
    let mut since_reconnect = 0.0f32;

    loop {
        let frame_start = Instant::now();
        let dt = frame_start.duration_since(last).as_secs_f32();
        last = frame_start;

        if let Some(err) = capture.as_ref().and_then(CpalCapture::take_error) {
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                warn!("Capture device lost, waiting for it to return");
                *capture = None;
                source.clear();
                since_reconnect = 0.0;
            }
        }

        if capture.is_none() {
            since_reconnect += dt;
            if since_reconnect >= RECONNECT_INTERVAL {
                since_reconnect = 0.0;
                match CpalCapture::new(args.device.as_deref()) {
                    // The device identity poll resets the detectors
                    Ok(reopened) => {
                        source.set_sample_rate(reopened.sample_rate() as f32);
                        *capture = Some(reopened);
                    }
                    Err(e) => warn!("Reconnect failed: {:#}", e),
                }
            }
        }

        if let Some(config) = watcher.and_then(ConfigWatcher::poll) {
            source.resize(config.sample_count);
            processor.update_config(config);
            processor.reset_detectors();
        }

        if let Some(active) = capture.as_ref() {
            source.push_samples(&active.get_samples());
        }
        processor.tick(source, dt);
        processor.poll_track(capture.as_ref().map(CpalCapture::device_name), dt);

        since_report += dt;
        if since_report >= args.report_interval {
            since_report = 0.0;
            let mut out = stdout.lock();
            if let Err(e) = report(&mut out, processor, args.json) {
                error!("Failed to write report: {}", e);
                return Err(e);
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < tick {
            thread::sleep(tick - elapsed);
        }
    }
}

fn report(out: &mut impl Write, processor: &AudioProcessor, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(&processor.snapshot())?;
        writeln!(out, "{}", line)?;
        return Ok(());
    }

    let meter: String = processor
        .band_energies()
        .iter()
        .map(|&e| {
            let level = ((e / 2.0).clamp(0.0, 1.0) * (METER.len() - 1) as f32).round() as usize;
            METER[level]
        })
        .collect();
    let beats: String = processor
        .band_detectors()
        .iter()
        .map(|d| if d.beat_timer() > 0.0 { '*' } else { '.' })
        .collect();
    let dominant = processor
        .dominant_band()
        .map_or_else(|| "-".to_string(), |b| b.to_string());

    writeln!(
        out,
        "{} {} dom={} beat={:.2} pulse={:.2}{}",
        meter,
        beats,
        dominant,
        processor.combined_beat_strength(),
        processor.pulse(),
        if processor.is_silent() { " (silent)" } else { "" }
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatflow_core::SpectrumSource;

    fn warmed_up_processor() -> AudioProcessor {
        let mut processor = AudioProcessor::new(ProcessorConfig::default(), 48000.0);
        processor.activate();
        for _ in 0..10 {
            processor.process_spectrum(&vec![0.2; 1024], false, 1.0 / 60.0);
        }
        processor
    }

    #[test]
    fn test_text_report() {
        let processor = warmed_up_processor();
        let mut out = Vec::new();
        report(&mut out, &processor, false).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.contains("dom="));
        assert!(line.contains("pulse="));
        assert_eq!(line.split_whitespace().next().unwrap().chars().count(), 9);
    }

    #[test]
    fn test_json_report_is_one_frame() {
        let processor = warmed_up_processor();
        let mut out = Vec::new();
        report(&mut out, &processor, true).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(line.lines().count(), 1);
        let frame: beatflow_core::AudioFrame = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(frame.band_energies.len(), 9);
        assert_eq!(frame.tick, 10);
    }

    #[test]
    fn test_silent_source_tick() {
        let mut processor = AudioProcessor::new(ProcessorConfig::default(), 44100.0);
        processor.activate();
        let mut source = FftSpectrumSource::new(44100.0, 1024, WindowFunction::default());
        assert_eq!(source.sample_rate(), 44100.0);
        assert!(processor.tick(&mut source, 1.0 / 60.0));
    }
}
