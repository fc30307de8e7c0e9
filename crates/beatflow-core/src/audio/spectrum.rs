//! Spectrum capture
//!
//! The processor pulls one fixed-size magnitude spectrum per tick from a
//! [`SpectrumSource`]. [`FftSpectrumSource`] builds one from raw mono
//! samples with rustfft; hosts with their own spectrum feed implement the
//! trait directly.

#[cfg(feature = "fft")]
use num_complex::Complex;
#[cfg(feature = "fft")]
use rustfft::{Fft, FftPlanner};
#[cfg(feature = "fft")]
use std::sync::Arc;
#[cfg(feature = "fft")]
use tracing::{debug, trace};

/// A spectrum summing below this is treated as silence
pub const SILENCE_SUM_THRESHOLD: f32 = 0.001;

/// Whether a magnitude spectrum carries no meaningful signal
pub fn is_silent_spectrum(spectrum: &[f32]) -> bool {
    spectrum.iter().sum::<f32>() < SILENCE_SUM_THRESHOLD
}

/// Supplies a magnitude spectrum once per tick
pub trait SpectrumSource {
    /// Sample rate of the underlying audio (Hz)
    fn sample_rate(&self) -> f32;

    /// Overwrite `buffer` with the current magnitude spectrum.
    ///
    /// Returns `true` when the source is currently silent.
    fn capture_spectrum(&mut self, buffer: &mut [f32]) -> bool;
}

/// Analysis window applied before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowFunction {
    /// Hann window
    Hann,
    /// 4-term Blackman-Harris window (low leakage)
    #[default]
    BlackmanHarris,
}

impl WindowFunction {
    /// Window coefficients for `len` samples
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        if len <= 1 {
            return vec![1.0; len];
        }
        let denom = (len - 1) as f32;
        let tau = 2.0 * std::f32::consts::PI;
        (0..len)
            .map(|i| {
                let t = i as f32 / denom;
                match self {
                    WindowFunction::Hann => 0.5 * (1.0 - (tau * t).cos()),
                    WindowFunction::BlackmanHarris => {
                        0.35875 - 0.48829 * (tau * t).cos() + 0.14128 * (2.0 * tau * t).cos()
                            - 0.01168 * (3.0 * tau * t).cos()
                    }
                }
            })
            .collect()
    }
}

/// Magnitude spectrum from a ring buffer of raw mono samples
#[cfg(feature = "fft")]
pub struct FftSpectrumSource {
    fft: Arc<dyn Fft<f32>>,
    sample_rate: f32,
    /// Number of output bins (FFT size is twice this)
    sample_count: usize,
    window_function: WindowFunction,
    window: Vec<f32>,
    /// Scale that maps a full-scale sine to a peak magnitude of ~1.0
    norm_factor: f32,
    input_buffer: Vec<f32>,
    write_pos: usize,
    fft_buffer: Vec<Complex<f32>>,
    scratch_buffer: Vec<Complex<f32>>,
    capture_count: u64,
}

#[cfg(feature = "fft")]
impl FftSpectrumSource {
    /// Create a source producing `sample_count` bins at `sample_rate`
    pub fn new(sample_rate: f32, sample_count: usize, window_function: WindowFunction) -> Self {
        let mut source = Self {
            fft: FftPlanner::new().plan_fft_forward(2),
            sample_rate,
            sample_count: 0,
            window_function,
            window: Vec::new(),
            norm_factor: 1.0,
            input_buffer: Vec::new(),
            write_pos: 0,
            fft_buffer: Vec::new(),
            scratch_buffer: Vec::new(),
            capture_count: 0,
        };
        source.resize(sample_count);
        source
    }

    /// Change the number of output bins, replanning the FFT
    pub fn resize(&mut self, sample_count: usize) {
        let sample_count = sample_count.max(1);
        if sample_count == self.sample_count {
            return;
        }
        let fft_size = sample_count * 2;

        let mut planner = FftPlanner::new();
        self.fft = planner.plan_fft_forward(fft_size);
        self.window = self.window_function.coefficients(fft_size);
        let window_sum: f32 = self.window.iter().sum();
        self.norm_factor = 2.0 / window_sum.max(f32::EPSILON);
        self.input_buffer = vec![0.0; fft_size];
        self.write_pos = 0;
        self.fft_buffer = vec![Complex::new(0.0, 0.0); fft_size];
        self.scratch_buffer = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        self.sample_count = sample_count;

        debug!(
            "FftSpectrumSource resized: sample_rate={}, bins={}, fft_size={}, window={:?}",
            self.sample_rate, sample_count, fft_size, self.window_function
        );
    }

    /// Update the sample rate reported to the processor
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Append mono samples. NaN/Inf are replaced with silence.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let len = self.input_buffer.len();
        for &sample in samples {
            self.input_buffer[self.write_pos] = if sample.is_finite() { sample } else { 0.0 };
            self.write_pos = (self.write_pos + 1) % len;
        }
    }

    /// Number of output bins
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Clear buffered audio
    pub fn clear(&mut self) {
        self.input_buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(feature = "fft")]
impl SpectrumSource for FftSpectrumSource {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn capture_spectrum(&mut self, buffer: &mut [f32]) -> bool {
        let fft_size = self.input_buffer.len();
        // Oldest sample sits at the write position
        for i in 0..fft_size {
            let src = (self.write_pos + i) % fft_size;
            self.fft_buffer[i] = Complex::new(self.input_buffer[src] * self.window[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        let bins = buffer.len().min(self.sample_count);
        for (out, bin) in buffer.iter_mut().zip(&self.fft_buffer[..bins]) {
            *out = bin.norm() * self.norm_factor;
        }
        buffer[bins..].fill(0.0);

        self.capture_count += 1;
        if self.capture_count % 600 == 0 {
            trace!(
                "Spectrum capture #{}: first bins={:?}",
                self.capture_count,
                &buffer[..bins.min(4)]
            );
        }

        is_silent_spectrum(buffer)
    }
}
