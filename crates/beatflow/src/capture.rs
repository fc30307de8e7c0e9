//! Live audio capture via cpal
//!
//! The input stream mixes every callback down to mono and hands the block to
//! the tick loop over a bounded channel. Blocks are dropped rather than
//! queued without limit when the loop falls behind.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, Stream, StreamConfig, StreamError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

/// Mono blocks buffered between the audio callback and the tick loop
const BLOCK_QUEUE: usize = 64;

/// Average interleaved frames down to one channel
pub fn mix_to_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
            sum / frame.len() as f32
        })
        .collect()
}

/// A running input stream
pub struct CpalCapture {
    _stream: Stream,
    samples: Receiver<Vec<f32>>,
    errors: Receiver<StreamError>,
    device_name: String,
    sample_rate: u32,
}

impl CpalCapture {
    /// Names of the available input devices, `None` if there are none
    pub fn list_devices() -> Result<Option<Vec<String>>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .context("Failed to enumerate input devices")?;
        let names: Vec<String> = devices.filter_map(|d| d.name().ok()).collect();
        Ok(if names.is_empty() { None } else { Some(names) })
    }

    /// Open and start capturing.
    ///
    /// `device` selects the first input whose name contains the text
    /// (case-insensitive); `None` uses the host's default input.
    pub fn new(device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device {
            Some(wanted) => {
                let wanted_lower = wanted.to_lowercase();
                host.input_devices()
                    .context("Failed to enumerate input devices")?
                    .find(|d| {
                        d.name()
                            .map(|n| n.to_lowercase().contains(&wanted_lower))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| anyhow!("No input device matching '{}'", wanted))?
            }
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No default input device"))?,
        };
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let supported = device
            .default_input_config()
            .with_context(|| format!("No input config for '{}'", device_name))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        let (sample_tx, samples) = bounded(BLOCK_QUEUE);
        let (error_tx, errors) = bounded(8);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, sample_tx, error_tx)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, sample_tx, error_tx)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, sample_tx, error_tx)
            }
            other => bail!("Unsupported sample format {:?}", other),
        }
        .with_context(|| format!("Failed to build input stream for '{}'", device_name))?;

        stream
            .play()
            .with_context(|| format!("Failed to start input stream for '{}'", device_name))?;

        info!(
            "Capturing from '{}': {} Hz, {} channel(s), {:?}",
            device_name, sample_rate, channels, sample_format
        );

        Ok(Self {
            _stream: stream,
            samples,
            errors,
            device_name,
            sample_rate,
        })
    }

    /// All mono samples received since the last call
    pub fn get_samples(&self) -> Vec<f32> {
        let mut out = Vec::new();
        for block in self.samples.try_iter() {
            out.extend_from_slice(&block);
        }
        out
    }

    /// Oldest stream error not yet handled
    pub fn take_error(&self) -> Option<StreamError> {
        self.errors.try_recv().ok()
    }

    /// Name of the capture device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stream sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: Sender<Vec<f32>>,
    errors: Sender<StreamError>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let err_fn = move |err: StreamError| {
        warn!("Audio stream error: {}", err);
        let _ = errors.try_send(err);
    };

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = mix_to_mono(data, channels);
            if let Err(TrySendError::Full(_)) = samples.try_send(mono) {
                debug!("Capture queue full, dropping block");
            }
        },
        err_fn,
        None,
    )
}
