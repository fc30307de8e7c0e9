//! Processor configuration
//!
//! [`ProcessorConfig`] is the externally supplied parameter set for the whole
//! pipeline. Per-band detector tuning lives in one [`BandTuning`] record per
//! band instead of parallel arrays, so a band's parameters can never drift out
//! of alignment with each other.
//!
//! Loading and saving files is the host's job; this module only converts
//! to and from JSON and normalizes whatever it is handed.

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default number of frequency bands
pub const DEFAULT_BAND_COUNT: usize = 9;

const DEFAULT_MIN_THRESHOLDS: [f32; DEFAULT_BAND_COUNT] =
    [0.16, 0.13, 0.12, 0.11, 0.10, 0.09, 0.07, 0.06, 0.055];
const DEFAULT_DECAY_RATES: [f32; DEFAULT_BAND_COUNT] =
    [0.96, 0.96, 0.96, 1.19, 1.25, 1.37, 0.91, 0.84, 0.81];
const DEFAULT_SENSITIVITIES: [f32; DEFAULT_BAND_COUNT] =
    [1.55, 1.42, 1.31, 1.1, 1.08, 1.04, 1.0, 1.11, 1.22];
const DEFAULT_THRESHOLD_MULTIPLIERS: [f32; DEFAULT_BAND_COUNT] =
    [0.99, 0.98, 0.97, 1.35, 1.3, 1.26, 1.15, 0.97, 0.96];
const DEFAULT_COOLDOWNS: [f32; DEFAULT_BAND_COUNT] =
    [0.20, 0.18, 0.16, 0.16, 0.16, 0.16, 0.15, 0.15, 0.15];
const DEFAULT_MIN_EXCEED: [f32; DEFAULT_BAND_COUNT] =
    [0.11, 0.09, 0.08, 0.075, 0.07, 0.06, 0.05, 0.04, 0.03];
const DEFAULT_BEAT_DECAYS: [f32; DEFAULT_BAND_COUNT] =
    [0.98, 0.97, 0.96, 0.86, 0.87, 0.88, 0.89, 0.90, 0.91];

/// Smallest and largest Gaussian kernel sizes accepted by the smoother
pub const KERNEL_SIZE_RANGE: (usize, usize) = (3, 11);

/// Accepted energy history lengths (seconds)
pub const HISTORY_SECS_RANGE: (u32, u32) = (1, 120);

/// Beat detection tuning for a single band (or the general detector)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandTuning {
    /// Floor for the dynamic threshold, also the history seed value on reset
    pub min_threshold: f32,
    /// How fast the dynamic threshold follows its target (clamped to 0..1)
    pub decay_rate: f32,
    /// Input gain applied to the compressed band energy
    pub sensitivity: f32,
    /// Extra scale on the effective trigger threshold
    pub threshold_multiplier: f32,
    /// Cooldown length recorded after each beat (seconds)
    pub cooldown: f32,
    /// Minimum excess over the effective threshold required to fire
    pub min_exceed: f32,
    /// Multiplicative decay floor for beat strength (0..1)
    pub beat_decay: f32,
}

impl BandTuning {
    /// Built-in tuning for a band index.
    ///
    /// Indices past the built-in table reuse the last (highest) band entry.
    pub fn default_for_band(index: usize) -> Self {
        let i = index.min(DEFAULT_BAND_COUNT - 1);
        Self {
            min_threshold: DEFAULT_MIN_THRESHOLDS[i],
            decay_rate: DEFAULT_DECAY_RATES[i],
            sensitivity: DEFAULT_SENSITIVITIES[i],
            threshold_multiplier: DEFAULT_THRESHOLD_MULTIPLIERS[i],
            cooldown: DEFAULT_COOLDOWNS[i],
            min_exceed: DEFAULT_MIN_EXCEED[i],
            beat_decay: DEFAULT_BEAT_DECAYS[i],
        }
    }

    /// Built-in tuning for the general (total energy) detector
    pub fn general() -> Self {
        Self {
            min_threshold: 0.06,
            decay_rate: 5.91,
            sensitivity: 1.3,
            threshold_multiplier: 1.23,
            cooldown: 0.14,
            min_exceed: 0.06,
            beat_decay: 0.75,
        }
    }

    /// Clamp every field into the range the detector can work with.
    ///
    /// Non-finite values fall back to `fallback`.
    pub fn sanitized(self, fallback: &BandTuning) -> Self {
        let pick = |v: f32, d: f32| if v.is_finite() { v } else { d };
        Self {
            min_threshold: pick(self.min_threshold, fallback.min_threshold).max(0.0001),
            decay_rate: pick(self.decay_rate, fallback.decay_rate).clamp(0.0, 1.0),
            sensitivity: pick(self.sensitivity, fallback.sensitivity).max(0.001),
            threshold_multiplier: pick(self.threshold_multiplier, fallback.threshold_multiplier)
                .max(0.1),
            cooldown: pick(self.cooldown, fallback.cooldown).max(0.01),
            min_exceed: pick(self.min_exceed, fallback.min_exceed).max(0.01),
            beat_decay: pick(self.beat_decay, fallback.beat_decay).clamp(0.0, 1.0),
        }
    }

    /// Read a single field
    pub fn get(&self, field: BandField) -> f32 {
        match field {
            BandField::MinThreshold => self.min_threshold,
            BandField::DecayRate => self.decay_rate,
            BandField::Sensitivity => self.sensitivity,
            BandField::ThresholdMultiplier => self.threshold_multiplier,
            BandField::Cooldown => self.cooldown,
            BandField::MinExceed => self.min_exceed,
            BandField::BeatDecay => self.beat_decay,
        }
    }

    /// Write a single field
    pub fn set(&mut self, field: BandField, value: f32) {
        match field {
            BandField::MinThreshold => self.min_threshold = value,
            BandField::DecayRate => self.decay_rate = value,
            BandField::Sensitivity => self.sensitivity = value,
            BandField::ThresholdMultiplier => self.threshold_multiplier = value,
            BandField::Cooldown => self.cooldown = value,
            BandField::MinExceed => self.min_exceed = value,
            BandField::BeatDecay => self.beat_decay = value,
        }
    }
}

/// Names a single [`BandTuning`] field, used for CSV-style live tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandField {
    /// [`BandTuning::min_threshold`]
    MinThreshold,
    /// [`BandTuning::decay_rate`]
    DecayRate,
    /// [`BandTuning::sensitivity`]
    Sensitivity,
    /// [`BandTuning::threshold_multiplier`]
    ThresholdMultiplier,
    /// [`BandTuning::cooldown`]
    Cooldown,
    /// [`BandTuning::min_exceed`]
    MinExceed,
    /// [`BandTuning::beat_decay`]
    BeatDecay,
}

impl BandField {
    /// All fields in display order
    pub const ALL: [BandField; 7] = [
        BandField::MinThreshold,
        BandField::DecayRate,
        BandField::Sensitivity,
        BandField::ThresholdMultiplier,
        BandField::Cooldown,
        BandField::MinExceed,
        BandField::BeatDecay,
    ];
}

/// Full parameter set for the audio processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of spectrum bins captured per tick
    pub sample_count: usize,
    /// Number of frequency bands (N)
    pub band_count: usize,
    /// Base speed at which band buffers fall when energy drops
    pub falloff_speed: f32,
    /// Global sensitivity applied to band energies
    pub sensitivity: f32,
    /// Global multiplier on detector input sensitivity
    pub beat_sensitivity: f32,
    /// Global multiplier on the effective trigger threshold
    pub beat_threshold: f32,
    /// Energy history length (seconds); detectors keep a quarter of it
    pub history_duration_secs: u32,
    /// Gaussian kernel size (odd, 3..=11)
    pub gaussian_kernel_size: usize,
    /// Gaussian sigma in bins
    pub gaussian_kernel_intensity: f32,
    /// Half-life of the adaptive gain EMA (seconds)
    pub ema_half_life_secs: f32,
    /// Median level the adaptive gain aims for
    pub target_band_level: f32,
    /// Time constant of the noise-floor EMA (seconds)
    pub noise_tau_secs: f32,
    /// Largest tick delta fed to the time constants (seconds)
    pub max_tick_dt: f32,
    /// Per-band detector tuning (exactly `band_count` entries after normalization)
    pub bands: Vec<BandTuning>,
    /// Tuning for the general (total energy) detector
    pub general: BandTuning,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sample_count: 1024,
            band_count: DEFAULT_BAND_COUNT,
            falloff_speed: 0.08,
            sensitivity: 1.0,
            beat_sensitivity: 1.0,
            beat_threshold: 1.0,
            history_duration_secs: 8,
            gaussian_kernel_size: 5,
            gaussian_kernel_intensity: 1.5,
            ema_half_life_secs: 1.2,
            target_band_level: 0.15,
            noise_tau_secs: 2.0,
            max_tick_dt: 0.25,
            bands: (0..DEFAULT_BAND_COUNT)
                .map(BandTuning::default_for_band)
                .collect(),
            general: BandTuning::general(),
        }
    }
}

impl ProcessorConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Seconds of energy history each detector keeps
    pub fn detector_history_secs(&self) -> f32 {
        self.history_duration_secs
            .clamp(HISTORY_SECS_RANGE.0, HISTORY_SECS_RANGE.1) as f32
            * 0.25
    }

    /// Return a copy that is safe to run with.
    ///
    /// Never fails: every out-of-range value is replaced and reported with a
    /// warning.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut cfg = self.clone();

        if cfg.band_count == 0 {
            warn!("band_count is 0, clamping to 1");
            cfg.band_count = 1;
        }

        let mut kernel = cfg.gaussian_kernel_size;
        if kernel % 2 == 0 {
            kernel += 1;
        }
        let kernel = kernel.clamp(KERNEL_SIZE_RANGE.0, KERNEL_SIZE_RANGE.1);
        if kernel != cfg.gaussian_kernel_size {
            warn!(
                "gaussian_kernel_size {} adjusted to {}",
                cfg.gaussian_kernel_size, kernel
            );
            cfg.gaussian_kernel_size = kernel;
        }

        let history = cfg
            .history_duration_secs
            .clamp(HISTORY_SECS_RANGE.0, HISTORY_SECS_RANGE.1);
        if history != cfg.history_duration_secs {
            warn!(
                "history_duration_secs {} adjusted to {}",
                cfg.history_duration_secs, history
            );
            cfg.history_duration_secs = history;
        }

        let positive = |name: &str, value: f32, default: f32| -> f32 {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                warn!("{} = {} is not positive, using {}", name, value, default);
                default
            }
        };
        cfg.gaussian_kernel_intensity = positive(
            "gaussian_kernel_intensity",
            cfg.gaussian_kernel_intensity,
            defaults.gaussian_kernel_intensity,
        );
        cfg.falloff_speed = positive("falloff_speed", cfg.falloff_speed, defaults.falloff_speed);
        cfg.ema_half_life_secs = positive(
            "ema_half_life_secs",
            cfg.ema_half_life_secs,
            defaults.ema_half_life_secs,
        );
        cfg.target_band_level = positive(
            "target_band_level",
            cfg.target_band_level,
            defaults.target_band_level,
        );
        cfg.noise_tau_secs = positive("noise_tau_secs", cfg.noise_tau_secs, defaults.noise_tau_secs);
        cfg.max_tick_dt = positive("max_tick_dt", cfg.max_tick_dt, defaults.max_tick_dt);

        let non_negative = |name: &str, value: f32, default: f32| -> f32 {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                warn!("{} = {} is invalid, using {}", name, value, default);
                default
            }
        };
        cfg.sensitivity = non_negative("sensitivity", cfg.sensitivity, defaults.sensitivity);
        cfg.beat_sensitivity = non_negative(
            "beat_sensitivity",
            cfg.beat_sensitivity,
            defaults.beat_sensitivity,
        );
        cfg.beat_threshold =
            non_negative("beat_threshold", cfg.beat_threshold, defaults.beat_threshold);

        if cfg.bands.len() != cfg.band_count {
            warn!(
                "per-band tuning has {} entries for {} bands, padding/truncating with defaults",
                cfg.bands.len(),
                cfg.band_count
            );
            let n = cfg.band_count;
            cfg.bands.truncate(n);
            let start = cfg.bands.len();
            cfg.bands.extend((start..n).map(BandTuning::default_for_band));
        }

        cfg.bands = cfg
            .bands
            .iter()
            .enumerate()
            .map(|(i, t)| t.sanitized(&BandTuning::default_for_band(i)))
            .collect();
        cfg.general = cfg.general.sanitized(&BandTuning::general());

        cfg
    }

    /// Strict validation for hosts that want to surface configuration problems.
    pub fn validate(&self) -> Result<()> {
        if self.band_count == 0 {
            return Err(CoreError::InvalidConfig("band_count must be >= 1".into()));
        }
        if self.bands.len() != self.band_count {
            return Err(CoreError::InvalidConfig(format!(
                "expected {} band tunings, found {}",
                self.band_count,
                self.bands.len()
            )));
        }
        if self.gaussian_kernel_size % 2 == 0
            || !(KERNEL_SIZE_RANGE.0..=KERNEL_SIZE_RANGE.1).contains(&self.gaussian_kernel_size)
        {
            return Err(CoreError::InvalidConfig(format!(
                "gaussian_kernel_size must be odd and within {}..={}, got {}",
                KERNEL_SIZE_RANGE.0, KERNEL_SIZE_RANGE.1, self.gaussian_kernel_size
            )));
        }
        if !(HISTORY_SECS_RANGE.0..=HISTORY_SECS_RANGE.1).contains(&self.history_duration_secs) {
            return Err(CoreError::InvalidConfig(format!(
                "history_duration_secs must be within {}..={}, got {}",
                HISTORY_SECS_RANGE.0, HISTORY_SECS_RANGE.1, self.history_duration_secs
            )));
        }
        if !self.gaussian_kernel_intensity.is_finite() || self.gaussian_kernel_intensity <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "gaussian_kernel_intensity must be > 0".into(),
            ));
        }
        for (i, t) in self.bands.iter().chain(std::iter::once(&self.general)).enumerate() {
            let finite = BandField::ALL.iter().all(|f| t.get(*f).is_finite());
            let in_range = t.min_threshold > 0.0
                && t.decay_rate >= 0.0
                && t.sensitivity > 0.0
                && t.threshold_multiplier > 0.0
                && t.cooldown > 0.0
                && t.min_exceed >= 0.0
                && (0.0..=1.0).contains(&t.beat_decay);
            if !finite || !in_range {
                let name = if i < self.bands.len() {
                    format!("band {}", i)
                } else {
                    "general".to_string()
                };
                return Err(CoreError::InvalidConfig(format!(
                    "{} tuning out of range: {:?}",
                    name, t
                )));
            }
        }
        Ok(())
    }

    /// Apply a comma-separated list to one field of every band.
    ///
    /// Missing or unparsable entries keep the band's built-in default.
    pub fn set_band_field_csv(&mut self, field: BandField, csv: &str) {
        let n = self.band_count.max(1);
        let fallback: Vec<f32> = (0..n)
            .map(|i| BandTuning::default_for_band(i).get(field))
            .collect();
        let values = parse_csv_floats(csv, n, &fallback);

        if self.bands.len() != n {
            self.bands.truncate(n);
            let start = self.bands.len();
            self.bands
                .extend((start..n).map(BandTuning::default_for_band));
        }
        for (band, value) in self.bands.iter_mut().zip(values) {
            band.set(field, value);
        }
    }

    /// Render one field of every band as a comma-separated list
    pub fn band_field_csv(&self, field: BandField) -> String {
        self.bands
            .iter()
            .map(|b| b.get(field).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parse `expected` floats from a comma-separated list.
///
/// Blank input, missing entries and entries that fail to parse take the
/// matching `fallback` value (or its last element, or 0.0 if it is empty).
pub fn parse_csv_floats(csv: &str, expected: usize, fallback: &[f32]) -> Vec<f32> {
    let fallback_at = |i: usize| {
        fallback
            .get(i)
            .or_else(|| fallback.last())
            .copied()
            .unwrap_or(0.0)
    };

    let parts: Vec<&str> = csv
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    (0..expected)
        .map(|i| {
            parts
                .get(i)
                .and_then(|p| p.parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or_else(|| fallback_at(i))
        })
        .collect()
}
