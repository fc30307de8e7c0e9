//! Band decomposition
//!
//! Maps spectrum bins into N perceptual frequency bands and turns each band
//! into a bounded energy value. Per band, every tick:
//!
//! 1. Weighted bin average (upper part of the band slightly favoured)
//! 2. Perceptual weight (bass up, treble gently down, mean weight ~1)
//! 3. Noise-floor tracking and gating
//! 4. Inverse-log pre-compression by band centre frequency
//! 5. Adaptive gain toward a target median level
//! 6. Sensitivity, static band boosts and rise limiting
//! 7. Attack/decay buffer
//! 8. Logarithmic output compression into `[0.001, 2.0]`

use super::math::{inverse_lerp, lerp};
use crate::config::ProcessorConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper edges (Hz) of the standard 9-band layout.
///
/// SubBass, Bass, LowMid, Mid, UpperMid, Presence, Brilliance, UltraHigh, Air
pub const BAND_EDGES_HZ: [f32; 9] = [
    65.0, 130.0, 261.0, 523.0, 1046.0, 2093.0, 4186.0, 8372.0, 16000.0,
];

/// Lowest and highest frequency used to shape the pre-compression exponent
const EXPONENT_FREQ_RANGE: (f32, f32) = (60.0, 16000.0);

/// Smallest output for a band that received signal
pub const MIN_BAND_ENERGY: f32 = 0.001;
/// Largest output value
pub const MAX_BAND_ENERGY: f32 = 2.0;

/// Ceiling of the attack/decay buffer
const BUFFER_CEILING: f32 = 5.0;

/// Rate (1/s) at which outputs fall toward zero during silence
const SILENCE_DECAY_RATE: f32 = 8.0;

/// Coarse class of a band, derived from its index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandClass {
    /// Bands 0..=2
    Bass,
    /// Bands 3..=6
    Mid,
    /// Bands 7 and above (including the general detector slot)
    High,
}

impl BandClass {
    /// Classify a band index
    pub fn from_index(index: usize) -> Self {
        match index {
            0..=2 => BandClass::Bass,
            3..=6 => BandClass::Mid,
            _ => BandClass::High,
        }
    }

    /// Max ratio a band may rise per tick relative to its buffer
    fn rise_limit(self) -> f32 {
        match self {
            BandClass::Bass => 2.2,
            BandClass::Mid => 1.8,
            BandClass::High => 1.5,
        }
    }

    /// Noise-gate multiplier over the tracked noise floor
    fn gate_factor(self) -> f32 {
        match self {
            BandClass::Bass => 1.3,
            _ => 1.6,
        }
    }
}

/// Inclusive range of spectrum bins that make up one band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRange {
    /// First bin (inclusive)
    pub start: usize,
    /// Last bin (inclusive)
    pub end: usize,
}

impl BandRange {
    /// Number of bins covered
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    /// Ranges always cover at least one bin
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Upper edge (Hz) of each band for `band_count` bands.
///
/// The standard 9-band table is used when it fits; other counts are spaced
/// geometrically over the same 65 Hz..16 kHz span.
pub fn band_edges_hz(band_count: usize) -> Vec<f32> {
    let n = band_count.max(1);
    if n == BAND_EDGES_HZ.len() {
        return BAND_EDGES_HZ.to_vec();
    }
    if n == 1 {
        return vec![BAND_EDGES_HZ[BAND_EDGES_HZ.len() - 1]];
    }
    let low = BAND_EDGES_HZ[0];
    let high = BAND_EDGES_HZ[BAND_EDGES_HZ.len() - 1];
    let ratio = high / low;
    (0..n)
        .map(|i| {
            if i == n - 1 {
                high
            } else {
                low * ratio.powf(i as f32 / (n - 1) as f32)
            }
        })
        .collect()
}

/// Precompute the bin range of every band.
///
/// Ranges are ordered, contiguous and non-overlapping, start at bin 0 and end
/// at the bin holding the top band edge. Every band gets at least one bin
/// while bins remain.
pub fn compute_band_ranges(
    band_count: usize,
    sample_count: usize,
    sample_rate: f32,
) -> Vec<BandRange> {
    let n = band_count.max(1);
    if sample_count == 0 {
        return vec![BandRange { start: 0, end: 0 }; n];
    }

    let nyquist = (sample_rate.max(1.0)) / 2.0;
    let bin_size = nyquist / sample_count as f32;
    let last = sample_count - 1;

    let mut next_start = 0usize;
    band_edges_hz(n)
        .into_iter()
        .map(|edge| {
            let edge_bin = ((edge / bin_size).floor() as usize).min(last);
            let start = next_start.min(last);
            let end = edge_bin.max(start);
            next_start = end + 1;
            BandRange { start, end }
        })
        .collect()
}

/// Perceptual weight per band, already normalized so the mean weight is ~1
pub fn perceptual_weights(band_count: usize) -> Vec<f32> {
    let n = band_count.max(1);
    let raw: Vec<f32> = (0..n)
        .map(|i| {
            let mut w = 1.0 - 0.15 * i as f32;
            if i < 3 {
                w *= 1.2;
            }
            w.clamp(0.5, 1.3)
        })
        .collect();
    let sum: f32 = raw.iter().sum();
    let norm = n as f32 / sum.max(0.0001);
    raw.into_iter().map(|w| w * norm).collect()
}

/// Adaptive state for one band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandState {
    /// Slow EMA of the pre-gain value
    pub ema: f32,
    /// Adaptive normalization gain (0.5..3.0)
    pub gain: f32,
    /// Noise-floor EMA
    pub noise_floor: f32,
    /// Attack/decay buffer
    pub buffer: f32,
    /// Last output energy
    pub value: f32,
    /// Whether this band was dominant on the last tick
    pub dominant: bool,
}

impl Default for BandState {
    fn default() -> Self {
        Self {
            ema: 0.05,
            gain: 1.0,
            noise_floor: 0.0,
            buffer: 0.0,
            value: 0.0,
            dominant: false,
        }
    }
}

/// Static per-band parameters derived from the band layout
#[derive(Debug, Clone, Copy)]
struct BandShape {
    range: BandRange,
    weight: f32,
    /// Pre-compression exponent (1.0 bass .. 0.75 treble)
    exponent: f32,
    class: BandClass,
}

/// Tuning the decomposer reads from the processor configuration
#[derive(Debug, Clone, Copy)]
struct DecomposerParams {
    falloff_speed: f32,
    sensitivity: f32,
    ema_half_life: f32,
    target_level: f32,
    noise_tau: f32,
}

impl From<&ProcessorConfig> for DecomposerParams {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            falloff_speed: config.falloff_speed,
            sensitivity: config.sensitivity,
            ema_half_life: config.ema_half_life_secs,
            target_level: config.target_band_level,
            noise_tau: config.noise_tau_secs,
        }
    }
}

/// Splits a smoothed spectrum into bounded per-band energies
#[derive(Debug, Clone)]
pub struct BandDecomposer {
    band_count: usize,
    sample_count: usize,
    sample_rate: f32,
    params: DecomposerParams,
    shapes: Vec<BandShape>,
    states: Vec<BandState>,
    values: Vec<f32>,
    dominant: Option<usize>,
    general_energy: f32,
}

impl BandDecomposer {
    /// Create a decomposer for the given configuration and sample rate
    pub fn new(config: &ProcessorConfig, sample_rate: f32) -> Self {
        let band_count = config.band_count.max(1);
        let mut decomposer = Self {
            band_count,
            sample_count: config.sample_count,
            sample_rate,
            params: DecomposerParams::from(config),
            shapes: Vec::new(),
            states: vec![BandState::default(); band_count],
            values: vec![0.0; band_count],
            dominant: None,
            general_energy: 0.0,
        };
        decomposer.rebuild_shapes();
        decomposer
    }

    fn rebuild_shapes(&mut self) {
        let ranges = compute_band_ranges(self.band_count, self.sample_count, self.sample_rate);
        let weights = perceptual_weights(self.band_count);
        let edges = band_edges_hz(self.band_count);

        self.shapes = ranges
            .into_iter()
            .zip(weights)
            .enumerate()
            .map(|(i, (range, weight))| {
                let low_hz = if i == 0 { 0.0 } else { edges[i - 1] };
                let centre_hz = (low_hz + edges[i]) * 0.5;
                let t = inverse_lerp(EXPONENT_FREQ_RANGE.0, EXPONENT_FREQ_RANGE.1, centre_hz);
                BandShape {
                    range,
                    weight,
                    exponent: lerp(1.0, 0.75, t),
                    class: BandClass::from_index(i),
                }
            })
            .collect();

        debug!(
            "Band ranges recomputed: bands={}, sample_count={}, sample_rate={}",
            self.band_count, self.sample_count, self.sample_rate
        );
    }

    /// Apply a new configuration.
    ///
    /// Ranges are recomputed only when the band count or sample count
    /// changes; adaptive state survives unless the band count changes.
    pub fn configure(&mut self, config: &ProcessorConfig) {
        self.params = DecomposerParams::from(config);
        let band_count = config.band_count.max(1);
        let layout_changed = band_count != self.band_count || config.sample_count != self.sample_count;

        if band_count != self.band_count {
            self.band_count = band_count;
            self.states = vec![BandState::default(); band_count];
            self.values = vec![0.0; band_count];
            self.dominant = None;
        }
        self.sample_count = config.sample_count;

        if layout_changed {
            self.rebuild_shapes();
        }
    }

    /// Update the sample rate, recomputing ranges if it changed
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        if (sample_rate - self.sample_rate).abs() > f32::EPSILON {
            self.sample_rate = sample_rate;
            self.rebuild_shapes();
        }
    }

    /// Reset adaptive state to near-zero defaults (track change)
    pub fn reset(&mut self) {
        self.states.fill(BandState::default());
        self.values.fill(0.0);
        self.dominant = None;
        self.general_energy = 0.0;
    }

    /// Decompose a smoothed spectrum into band energies.
    ///
    /// Returns the per-band outputs and the dominant band (`None` when no
    /// band carries energy).
    pub fn decompose(&mut self, spectrum: &[f32], dt: f32) -> (&[f32], Option<usize>) {
        if spectrum.is_empty() {
            self.values.fill(0.0);
            for state in &mut self.states {
                state.value = 0.0;
            }
            self.finish_tick();
            return (&self.values, self.dominant);
        }

        let p = self.params;
        let noise_alpha = 1.0 - (-dt / p.noise_tau.max(0.1)).exp();
        let gain_lambda = (-std::f32::consts::LN_2 * dt / p.ema_half_life.max(0.05)).exp();

        for (band, (shape, state)) in self.shapes.iter().zip(self.states.iter_mut()).enumerate() {
            let range = shape.range;
            if range.start >= spectrum.len() {
                state.value = 0.0;
                self.values[band] = 0.0;
                continue;
            }

            let bins = range.len() as f32;
            let end = range.end.min(spectrum.len() - 1);
            let sum: f32 = spectrum[range.start..=end]
                .iter()
                .enumerate()
                .map(|(offset, &magnitude)| {
                    let position = offset as f32 / bins;
                    magnitude * lerp(1.0, 1.2, position.powf(0.8))
                })
                .sum();

            let mut average = (sum / bins) * shape.weight;
            if !average.is_finite() || average < 0.0 {
                average = 0.0;
            }

            // Noise floor only learns from quiet frames
            if average < state.ema * 0.7 {
                state.noise_floor = lerp(state.noise_floor, average, noise_alpha);
            }
            if average < state.noise_floor * shape.class.gate_factor() {
                average = 0.0;
            }

            let pre_gain = average.powf(shape.exponent);

            state.ema = lerp(pre_gain, state.ema, gain_lambda);
            state.gain = (p.target_level / state.ema.max(0.0005)).clamp(0.5, 3.0);

            let mut scaled = pre_gain * p.sensitivity * state.gain;
            let mut decrease = lerp(
                p.falloff_speed,
                p.falloff_speed * 3.0,
                state.buffer / BUFFER_CEILING,
            );
            match shape.class {
                BandClass::Bass => {
                    scaled *= 2.0;
                    decrease *= 0.8;
                }
                BandClass::High => {
                    scaled *= 1.2;
                    decrease *= 1.1;
                }
                BandClass::Mid => {}
            }

            let limit = state.buffer * shape.class.rise_limit();
            if state.buffer > 0.0 && scaled > limit {
                scaled = limit;
            }

            // Falloff never undershoots the current level, so steady input
            // gives a steady output
            if scaled > state.buffer {
                state.buffer = scaled.clamp(0.0, BUFFER_CEILING);
            } else {
                state.buffer = (state.buffer - decrease).max(scaled).max(0.0);
            }

            let (k, scale) = match shape.class {
                BandClass::Bass => (6.0, 1.8),
                _ => (9.0, 1.5),
            };
            let value = ((1.0 + state.buffer * k).log10() * scale)
                .clamp(MIN_BAND_ENERGY, MAX_BAND_ENERGY);

            state.value = value;
            self.values[band] = value;
        }

        self.finish_tick();
        (&self.values, self.dominant)
    }

    /// Fast-decay all outputs toward zero instead of decomposing (silence)
    pub fn decay_silent(&mut self, dt: f32) -> (&[f32], Option<usize>) {
        let t = dt * SILENCE_DECAY_RATE;
        for (value, state) in self.values.iter_mut().zip(self.states.iter_mut()) {
            *value = lerp(*value, 0.0, t);
            state.buffer = lerp(state.buffer, 0.0, t);
            state.value = *value;
        }
        self.finish_tick();
        (&self.values, self.dominant)
    }

    /// Recompute dominant band and general energy from `values`
    fn finish_tick(&mut self) {
        let mut max_value = 0.0f32;
        self.dominant = None;
        for (i, &value) in self.values.iter().enumerate() {
            if value > max_value {
                max_value = value;
                self.dominant = Some(i);
            }
        }
        for (i, state) in self.states.iter_mut().enumerate() {
            state.dominant = self.dominant == Some(i);
        }
        self.general_energy = self.values.iter().sum::<f32>() / self.values.len().max(1) as f32;
    }

    /// Current per-band outputs
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Index of the band with the largest output
    pub fn dominant_band(&self) -> Option<usize> {
        self.dominant
    }

    /// Mean of all band outputs, fed to the general detector
    pub fn general_energy(&self) -> f32 {
        self.general_energy
    }

    /// Precomputed bin ranges
    pub fn ranges(&self) -> Vec<BandRange> {
        self.shapes.iter().map(|s| s.range).collect()
    }

    /// Normalized perceptual weights
    pub fn weights(&self) -> Vec<f32> {
        self.shapes.iter().map(|s| s.weight).collect()
    }

    /// Adaptive state of every band
    pub fn states(&self) -> &[BandState] {
        &self.states
    }

    /// Number of bands
    pub fn band_count(&self) -> usize {
        self.band_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_standard_ranges_at_48k() {
        let ranges = compute_band_ranges(9, 1024, 48000.0);
        assert_eq!(ranges.len(), 9);
        // 23.4 Hz bins: 65 Hz lands in bin 2, 16 kHz in bin 682
        assert_eq!(ranges[0], BandRange { start: 0, end: 2 });
        assert_eq!(ranges[1].start, 3);
        assert_eq!(ranges[8].end, 682);
    }

    #[test]
    fn test_ranges_with_tiny_sample_count() {
        let ranges = compute_band_ranges(9, 4, 48000.0);
        for r in &ranges {
            assert!(r.start <= r.end);
            assert!(r.end <= 3);
        }
    }

    #[test]
    fn test_band_class() {
        assert_eq!(BandClass::from_index(0), BandClass::Bass);
        assert_eq!(BandClass::from_index(2), BandClass::Bass);
        assert_eq!(BandClass::from_index(3), BandClass::Mid);
        assert_eq!(BandClass::from_index(6), BandClass::Mid);
        assert_eq!(BandClass::from_index(9), BandClass::High);
    }

    #[test]
    fn test_perceptual_weights_mean_is_one() {
        for n in 1..16 {
            let weights = perceptual_weights(n);
            let mean: f32 = weights.iter().sum::<f32>() / n as f32;
            assert!((mean - 1.0).abs() < 1e-4, "n={} mean={}", n, mean);
        }
        let weights = perceptual_weights(9);
        assert!(weights[0] > weights[8]);
    }

    #[test]
    fn test_geometric_edges_for_other_counts() {
        let edges = band_edges_hz(4);
        assert_eq!(edges.len(), 4);
        assert!((edges[0] - 65.0).abs() < 1e-3);
        assert!((edges[3] - 16000.0).abs() < 1.0);
        assert!(edges.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_spectrum_gives_zero_and_no_dominant() {
        let config = ProcessorConfig::default();
        let mut decomposer = BandDecomposer::new(&config, 48000.0);
        let (values, dominant) = decomposer.decompose(&[], DT);
        assert!(values.iter().all(|&v| v == 0.0));
        assert_eq!(dominant, None);
        assert_eq!(decomposer.general_energy(), 0.0);
    }

    #[test]
    fn test_outputs_are_bounded() {
        let config = ProcessorConfig::default();
        let mut decomposer = BandDecomposer::new(&config, 48000.0);
        let spectrum = vec![50.0; 1024];
        for _ in 0..30 {
            let (values, _) = decomposer.decompose(&spectrum, DT);
            for &v in values {
                assert!((MIN_BAND_ENERGY..=MAX_BAND_ENERGY).contains(&v));
            }
        }
    }

    #[test]
    fn test_bass_only_spectrum_makes_bass_dominant() {
        let config = ProcessorConfig::default();
        let mut decomposer = BandDecomposer::new(&config, 48000.0);
        let mut spectrum = vec![0.0; 1024];
        for bin in spectrum.iter_mut().take(3) {
            *bin = 0.2;
        }
        let mut dominant = None;
        for _ in 0..10 {
            dominant = decomposer.decompose(&spectrum, DT).1;
        }
        assert_eq!(dominant, Some(0));
        assert!(decomposer.states()[0].dominant);
    }

    #[test]
    fn test_rise_is_limited() {
        let config = ProcessorConfig::default();
        let mut decomposer = BandDecomposer::new(&config, 48000.0);
        let steady = vec![0.1; 1024];
        for _ in 0..60 {
            decomposer.decompose(&steady, DT);
        }
        let before = decomposer.states()[4].buffer;
        assert!(before > 0.0);
        let loud = vec![5.0; 1024];
        decomposer.decompose(&loud, DT);
        let after = decomposer.states()[4].buffer;
        assert!(after > before);
        assert!(after <= before * 1.8 + 1e-6);
    }

    #[test]
    fn test_silent_decay_reaches_zero() {
        let config = ProcessorConfig::default();
        let mut decomposer = BandDecomposer::new(&config, 48000.0);
        let spectrum = vec![0.05; 1024];
        for _ in 0..30 {
            decomposer.decompose(&spectrum, DT);
        }
        for _ in 0..120 {
            decomposer.decay_silent(DT);
        }
        assert!(decomposer.values().iter().all(|&v| v < 1e-3));
    }

    #[test]
    fn test_configure_resizes_on_band_change() {
        let config = ProcessorConfig::default();
        let mut decomposer = BandDecomposer::new(&config, 44100.0);
        let smaller = ProcessorConfig {
            band_count: 4,
            ..Default::default()
        }
        .normalized();
        decomposer.configure(&smaller);
        assert_eq!(decomposer.band_count(), 4);
        assert_eq!(decomposer.values().len(), 4);
        assert_eq!(decomposer.ranges().len(), 4);
    }

    proptest! {
        #[test]
        fn prop_ranges_partition_bins(
            bands in 1usize..24,
            sample_count in 64usize..4096,
            sample_rate in prop::sample::select(vec![22050.0f32, 44100.0, 48000.0, 96000.0]),
        ) {
            let ranges = compute_band_ranges(bands, sample_count, sample_rate);
            prop_assert_eq!(ranges.len(), bands);
            prop_assert_eq!(ranges[0].start, 0);
            for r in &ranges {
                prop_assert!(r.start <= r.end);
                prop_assert!(r.end < sample_count);
            }
            let top_bin = ((16000.0 / (sample_rate / 2.0 / sample_count as f32)).floor() as usize)
                .min(sample_count - 1);
            // Contiguous and non-overlapping while bins remain
            for pair in ranges.windows(2) {
                if pair[0].end < sample_count - 1 {
                    prop_assert_eq!(pair[1].start, pair[0].end + 1);
                }
            }
            prop_assert!(ranges[bands - 1].end >= top_bin);
        }

        #[test]
        fn prop_decompose_is_bounded(
            spectrum in prop::collection::vec(0.0f32..10.0, 1024),
            ticks in 1usize..20,
        ) {
            let config = ProcessorConfig::default();
            let mut decomposer = BandDecomposer::new(&config, 44100.0);
            for _ in 0..ticks {
                let (values, _) = decomposer.decompose(&spectrum, DT);
                for &v in values {
                    prop_assert!((MIN_BAND_ENERGY..=MAX_BAND_ENERGY).contains(&v));
                }
            }
        }
    }
}
