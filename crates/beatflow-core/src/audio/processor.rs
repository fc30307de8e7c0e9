//! Audio processing facade
//!
//! [`AudioProcessor`] owns every stage of the pipeline and runs it once per
//! tick:
//!
//! ```text
//! SpectrumSource -> GaussianSmoother -> BandDecomposer
//!     -> BeatDetector x (N + 1) -> BeatCoordinator -> AudioFrame
//! ```
//!
//! Initialization is two-phase: [`AudioProcessor::new`] builds the pipeline,
//! [`AudioProcessor::activate`] starts processing once the host is ready.
//! Ticks before activation are ignored.

use super::bands::{BandDecomposer, BandRange};
use super::coordinator::BeatCoordinator;
use super::detector::{BeatDetector, DetectorDebug};
use super::smoothing::GaussianSmoother;
use super::spectrum::{is_silent_spectrum, SpectrumSource};
use super::track::TrackChangeDetector;
use crate::config::{BandTuning, ProcessorConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// Read-only outputs of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Ticks processed since creation
    pub tick: u64,
    /// Whether the source was silent this tick
    pub silent: bool,
    /// Per-band energy (0.001..=2.0 while audible)
    pub band_energies: Vec<f32>,
    /// Band with the largest energy
    pub dominant_band: Option<usize>,
    /// Mean of all band energies
    pub general_energy: f32,
    /// Per-band beat strength (0..=3)
    pub band_beat_strengths: Vec<f32>,
    /// Per-band seconds left in the current beat
    pub band_beat_timers: Vec<f32>,
    /// Beat strength of the general detector
    pub general_beat_strength: f32,
    /// Beat timer of the general detector
    pub general_beat_timer: f32,
    /// Maximum beat strength across all detectors
    pub combined_beat_strength: f32,
    /// Smoothed pulse (1.0 at rest)
    pub pulse: f32,
    /// Detector internals: bands first, general last
    pub detectors: Vec<DetectorDebug>,
}

/// Owns and drives the whole audio-to-beat pipeline
pub struct AudioProcessor {
    config: ProcessorConfig,
    sample_rate: f32,
    smoother: GaussianSmoother,
    decomposer: BandDecomposer,
    band_detectors: Vec<BeatDetector>,
    general_detector: BeatDetector,
    coordinator: BeatCoordinator,
    track: TrackChangeDetector,
    /// Working copy of the spectrum, smoothed in place
    spectrum: Vec<f32>,
    active: bool,
    /// Seed detector baselines from the next audible tick
    needs_prime: bool,
    silent: bool,
    last_dt: f32,
    tick_count: u64,
}

impl AudioProcessor {
    /// Build the pipeline. Call [`Self::activate`] before ticking.
    pub fn new(config: ProcessorConfig, sample_rate: f32) -> Self {
        let config = config.normalized();
        let history_secs = config.detector_history_secs();
        let band_count = config.band_count;

        let decomposer = BandDecomposer::new(&config, sample_rate);
        let band_detectors = (0..band_count)
            .map(|i| BeatDetector::new(i, config.bands[i], history_secs, 0.0))
            .collect();
        let general_detector = BeatDetector::new(band_count, config.general, history_secs, 0.0);
        let mut coordinator = BeatCoordinator::new();
        coordinator.set_band_weights(&decomposer.weights());

        debug!(
            "AudioProcessor created: sample_rate={}, sample_count={}, bands={}, history={}s",
            sample_rate, config.sample_count, band_count, history_secs
        );

        let mut processor = Self {
            spectrum: vec![0.0; config.sample_count],
            config,
            sample_rate,
            smoother: GaussianSmoother::new(),
            decomposer,
            band_detectors,
            general_detector,
            coordinator,
            track: TrackChangeDetector::default(),
            active: false,
            needs_prime: true,
            silent: true,
            last_dt: 0.0,
            tick_count: 0,
        };
        processor.apply_detector_config();
        processor.reset_detectors();
        processor
    }

    /// Start processing ticks
    pub fn activate(&mut self) {
        if !self.active {
            self.active = true;
            self.needs_prime = true;
            info!("AudioProcessor activated");
        }
    }

    /// Whether [`Self::activate`] has been called
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Re-seed detector baselines from the next audible tick
    pub fn reprime(&mut self) {
        self.needs_prime = true;
        debug!("AudioProcessor reprime requested");
    }

    /// Pull a spectrum from `source` and run one tick.
    ///
    /// Returns the silence flag reported by the source.
    pub fn tick<S: SpectrumSource + ?Sized>(&mut self, source: &mut S, dt: f32) -> bool {
        if !self.active {
            return true;
        }

        let sample_rate = source.sample_rate();
        if sample_rate.is_finite() && sample_rate > 0.0 && sample_rate != self.sample_rate {
            info!(
                "Sample rate changed: {} -> {}, recomputing band ranges",
                self.sample_rate, sample_rate
            );
            self.sample_rate = sample_rate;
            self.decomposer.set_sample_rate(sample_rate);
        }

        let mut spectrum = std::mem::take(&mut self.spectrum);
        spectrum.resize(self.config.sample_count, 0.0);
        let silent = source.capture_spectrum(&mut spectrum);
        self.run(&mut spectrum, silent, dt);
        self.spectrum = spectrum;
        silent
    }

    /// Run one tick on a spectrum supplied by the caller.
    ///
    /// The spectrum is copied; `silent` is combined with a silence check on
    /// the data itself.
    pub fn process_spectrum(&mut self, spectrum: &[f32], silent: bool, dt: f32) {
        if !self.active {
            return;
        }
        let mut working = std::mem::take(&mut self.spectrum);
        working.clear();
        working.extend_from_slice(spectrum);
        let silent = silent || is_silent_spectrum(&working);
        self.run(&mut working, silent, dt);
        self.spectrum = working;
    }

    fn run(&mut self, spectrum: &mut [f32], silent: bool, dt: f32) {
        let dt = self.clamp_dt(dt);
        self.last_dt = dt;
        self.tick_count += 1;
        self.ensure_detectors();

        let silent = silent || spectrum.is_empty();
        self.silent = silent;

        if silent {
            self.decomposer.decay_silent(dt);
        } else {
            self.smoother.smooth_in_place(
                spectrum,
                self.config.gaussian_kernel_size,
                self.config.gaussian_kernel_intensity,
            );
            self.decomposer.decompose(spectrum, dt);
        }

        let energies = self.decomposer.values();
        let general_energy = self.decomposer.general_energy();

        if self.needs_prime && !silent {
            for (detector, &energy) in self.band_detectors.iter_mut().zip(energies) {
                detector.prime(energy);
            }
            self.general_detector.prime(general_energy);
            self.needs_prime = false;
            debug!("Detectors primed on tick {}", self.tick_count);
        }

        for (detector, &energy) in self.band_detectors.iter_mut().zip(energies) {
            detector.detect(energy, silent, dt);
        }
        self.general_detector.detect(general_energy, silent, dt);

        self.coordinator.update(
            self.band_detectors
                .iter()
                .chain(std::iter::once(&self.general_detector))
                .map(Some),
            dt,
        );

        if self.tick_count % 600 == 0 {
            trace!(
                "Tick #{}: dominant={:?}, combined={:.3}, pulse={:.3}, silent={}",
                self.tick_count,
                self.decomposer.dominant_band(),
                self.coordinator.combined_strength(),
                self.coordinator.pulse(),
                silent
            );
        }
    }

    fn clamp_dt(&self, dt: f32) -> f32 {
        if !dt.is_finite() || dt < 0.0 {
            debug!("Invalid tick delta {}, treating as 0", dt);
            return 0.0;
        }
        if dt > self.config.max_tick_dt {
            debug!(
                "Tick delta {:.3}s clamped to {:.3}s",
                dt, self.config.max_tick_dt
            );
            return self.config.max_tick_dt;
        }
        dt
    }

    /// Recreate missing detectors or drop extra ones to match the band count
    fn ensure_detectors(&mut self) {
        let band_count = self.config.band_count;
        if self.band_detectors.len() == band_count {
            return;
        }
        warn!(
            "Detector count {} does not match band count {}, rebuilding",
            self.band_detectors.len(),
            band_count
        );
        let history_secs = self.config.detector_history_secs();
        self.band_detectors.truncate(band_count);
        let start = self.band_detectors.len();
        for i in start..band_count {
            let tuning = self
                .config
                .bands
                .get(i)
                .copied()
                .unwrap_or_else(|| BandTuning::default_for_band(i));
            self.band_detectors
                .push(BeatDetector::new(i, tuning, history_secs, self.last_dt));
        }
        self.apply_detector_config();
    }

    fn apply_detector_config(&mut self) {
        let cfg = &self.config;
        let history_secs = cfg.detector_history_secs();
        for (detector, tuning) in self.band_detectors.iter_mut().zip(&cfg.bands) {
            detector.configure(*tuning, cfg.beat_sensitivity, cfg.beat_threshold, history_secs);
        }
        self.general_detector.configure(
            cfg.general,
            cfg.beat_sensitivity,
            cfg.beat_threshold,
            history_secs,
        );
    }

    /// Apply a new configuration at runtime.
    ///
    /// Tuning takes effect on the next tick. A band-count change rebuilds the
    /// detectors; history length changes apply on the next reset.
    pub fn update_config(&mut self, config: ProcessorConfig) {
        let config = config.normalized();
        let band_count_changed = config.band_count != self.config.band_count;

        self.decomposer.configure(&config);
        self.config = config;
        self.spectrum.resize(self.config.sample_count, 0.0);

        if band_count_changed {
            let history_secs = self.config.detector_history_secs();
            let band_count = self.config.band_count;
            self.band_detectors = (0..band_count)
                .map(|i| BeatDetector::new(i, self.config.bands[i], history_secs, self.last_dt))
                .collect();
            self.general_detector =
                BeatDetector::new(band_count, self.config.general, history_secs, self.last_dt);
            self.coordinator.set_band_weights(&self.decomposer.weights());
            self.needs_prime = true;
        }
        self.apply_detector_config();
        info!(
            "Configuration applied: bands={}, sample_count={}",
            self.config.band_count, self.config.sample_count
        );
    }

    /// Reset every detector and band state (track change).
    ///
    /// Configuration is re-applied first so the history floor follows the
    /// current minimum thresholds.
    pub fn reset_detectors(&mut self) {
        self.apply_detector_config();
        for detector in &mut self.band_detectors {
            detector.reset(self.last_dt);
        }
        self.general_detector.reset(self.last_dt);
        self.decomposer.reset();
        self.coordinator.set_band_weights(&self.decomposer.weights());
        self.coordinator.reset();
        self.needs_prime = true;
        info!("Beat detectors reset");
    }

    /// Notify the processor that the track changed
    pub fn on_track_changed(&mut self) {
        self.reset_detectors();
    }

    /// Report the current track identity; resets detectors when it changes.
    ///
    /// Returns `true` if a change was detected.
    pub fn poll_track(&mut self, identity: Option<&str>, dt: f32) -> bool {
        let changed = self.track.observe(identity, dt);
        if changed {
            self.on_track_changed();
        }
        changed
    }

    /// Current (normalized) configuration
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Sample rate used for band ranges
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Per-band energies
    pub fn band_energies(&self) -> &[f32] {
        self.decomposer.values()
    }

    /// Band with the largest energy
    pub fn dominant_band(&self) -> Option<usize> {
        self.decomposer.dominant_band()
    }

    /// Mean band energy
    pub fn general_energy(&self) -> f32 {
        self.decomposer.general_energy()
    }

    /// Precomputed bin range per band
    pub fn band_ranges(&self) -> Vec<BandRange> {
        self.decomposer.ranges()
    }

    /// Per-band detectors
    pub fn band_detectors(&self) -> &[BeatDetector] {
        &self.band_detectors
    }

    /// Detector over the mean band energy
    pub fn general_detector(&self) -> &BeatDetector {
        &self.general_detector
    }

    /// Beat strength of band `index`, 0.0 for an unknown band
    pub fn band_beat_strength(&self, index: usize) -> f32 {
        self.band_detectors
            .get(index)
            .map_or(0.0, BeatDetector::beat_strength)
    }

    /// Beat timer of band `index`, 0.0 for an unknown band
    pub fn band_beat_timer(&self, index: usize) -> f32 {
        self.band_detectors
            .get(index)
            .map_or(0.0, BeatDetector::beat_timer)
    }

    /// Maximum beat strength across all detectors
    pub fn combined_beat_strength(&self) -> f32 {
        self.coordinator.combined_strength()
    }

    /// Smoothed pulse
    pub fn pulse(&self) -> f32 {
        self.coordinator.pulse()
    }

    /// Whether the last tick was silent
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Ticks processed so far
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Copy all outputs into an [`AudioFrame`]
    pub fn snapshot(&self) -> AudioFrame {
        AudioFrame {
            tick: self.tick_count,
            silent: self.silent,
            band_energies: self.decomposer.values().to_vec(),
            dominant_band: self.decomposer.dominant_band(),
            general_energy: self.decomposer.general_energy(),
            band_beat_strengths: self
                .band_detectors
                .iter()
                .map(BeatDetector::beat_strength)
                .collect(),
            band_beat_timers: self
                .band_detectors
                .iter()
                .map(BeatDetector::beat_timer)
                .collect(),
            general_beat_strength: self.general_detector.beat_strength(),
            general_beat_timer: self.general_detector.beat_timer(),
            combined_beat_strength: self.coordinator.combined_strength(),
            pulse: self.coordinator.pulse(),
            detectors: self
                .band_detectors
                .iter()
                .chain(std::iter::once(&self.general_detector))
                .map(BeatDetector::debug_state)
                .collect(),
        }
    }
}
