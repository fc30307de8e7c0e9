//! Beat detection
//!
//! One [`BeatDetector`] runs per band plus one "general" instance over the
//! mean band energy. Each keeps a rolling energy history with O(1) mean and
//! variance, derives a dynamic threshold from it and runs a dual-threshold
//! state machine:
//!
//! - **Tracking**: fires once energy exceeds the effective threshold by more
//!   than `min_exceed`, then enters the reset phase.
//! - **Reset phase**: a lower reset threshold chases the energy; no new beat
//!   can fire until energy drops under it. Energy that stays above the
//!   trigger threshold keeps blending a sustained strength into the output.
//!
//! The history holds compressed energy. Thresholds are shaped into the same
//! live domain as the compared energy (band exponent and sensitivity), and
//! the effective threshold never sits below the live level of the history
//! mean. A steady signal therefore never exceeds it.
//!
//! Beat strength is not clamped to 1; values up to 3 are headroom for very
//! strong transients.

use super::bands::BandClass;
use super::math::{clamp01, finite_or_zero, inverse_lerp, lerp};
use crate::config::BandTuning;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const EPSILON: f32 = 1e-6;

/// Compressed energy below this is treated as no signal
const SILENCE_FLOOR: f32 = 0.002;

/// Lowest tick rate used to size the history buffer
const MIN_HISTORY_FPS: f32 = 30.0;
/// Highest tick rate used to size the history buffer
const MAX_HISTORY_FPS: f32 = 120.0;
/// Frame time assumed when sizing history on the first frame
const FALLBACK_FRAME_TIME: f32 = 0.0166;

/// Anything that exposes a current beat strength
pub trait BeatSource {
    /// Current beat strength (0..=3)
    fn beat_strength(&self) -> f32;
}

/// Coarse state of a detector, for debug overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorPhase {
    /// Armed and tracking energy
    Tracking,
    /// A beat pulse is active (`beat_timer > 0`)
    Triggered,
    /// Waiting for energy to fall under the reset threshold
    ResetPhase,
}

/// Snapshot of the last beat that fired
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Energy that triggered the beat
    pub energy: f32,
    /// Effective threshold at the time
    pub threshold: f32,
    /// Strength assigned to the beat
    pub strength: f32,
    /// Pulse duration (seconds)
    pub duration: f32,
}

/// Debug-only view of a detector's internals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorDebug {
    /// Band index (N for the general detector)
    pub band_index: usize,
    /// Current state
    pub phase: DetectorPhase,
    /// Current compressed, sensitivity-adjusted energy
    pub current_energy: f32,
    /// Smoothed dynamic threshold before multipliers
    pub current_threshold: f32,
    /// Threshold energy must exceed to fire
    pub effective_threshold: f32,
    /// Lower hysteresis threshold
    pub reset_threshold: f32,
    /// Mean of the energy history
    pub average_energy: f32,
    /// Variance of the energy history
    pub variance: f32,
    /// Detection confidence (0..1)
    pub confidence: f32,
    /// Informational cooldown left since the last beat
    pub cooldown_remaining: f32,
    /// Most recent beat, if any
    pub last_beat: Option<BeatEvent>,
}

/// Adaptive-threshold beat detector for one band
#[derive(Debug, Clone, PartialEq)]
pub struct BeatDetector {
    band_index: usize,
    class: BandClass,
    tuning: BandTuning,
    /// Global multiplier on input sensitivity
    global_sensitivity: f32,
    /// Global multiplier on the effective threshold
    global_threshold: f32,
    history_secs: f32,

    history: Vec<f32>,
    history_index: usize,
    running_sum: f64,
    running_sum_sq: f64,

    previous_energy: f32,
    current_energy: f32,
    current_threshold: f32,
    effective_threshold: f32,
    average_energy: f32,
    variance: f32,

    in_reset_phase: bool,
    reset_threshold: f32,

    beat_strength: f32,
    peak_strength: f32,
    beat_timer: f32,
    peak_hold: f32,
    cooldown_remaining: f32,
    last_duration: f32,
    confidence: f32,
    last_beat: Option<BeatEvent>,
}

impl BeatDetector {
    /// Create a detector for `band_index` and reset it.
    ///
    /// `dt` is the expected tick length, used to size the history buffer.
    pub fn new(band_index: usize, tuning: BandTuning, history_secs: f32, dt: f32) -> Self {
        let mut detector = Self {
            band_index,
            class: BandClass::from_index(band_index),
            tuning,
            global_sensitivity: 1.0,
            global_threshold: 1.0,
            history_secs,
            history: Vec::new(),
            history_index: 0,
            running_sum: 0.0,
            running_sum_sq: 0.0,
            previous_energy: 0.0,
            current_energy: 0.0,
            current_threshold: 0.0,
            effective_threshold: 0.0,
            average_energy: 0.0,
            variance: 0.0,
            in_reset_phase: false,
            reset_threshold: 0.0,
            beat_strength: 0.0,
            peak_strength: 0.0,
            beat_timer: 0.0,
            peak_hold: 0.0,
            cooldown_remaining: 0.0,
            last_duration: 0.1,
            confidence: 1.0,
            last_beat: None,
        };
        detector.reset(dt);
        detector
    }

    /// Apply new tuning and global multipliers.
    ///
    /// Takes effect on the next [`Self::detect`]; the history buffer is only
    /// resized by [`Self::reset`].
    pub fn configure(
        &mut self,
        tuning: BandTuning,
        global_sensitivity: f32,
        global_threshold: f32,
        history_secs: f32,
    ) {
        self.tuning = tuning;
        self.global_sensitivity = global_sensitivity;
        self.global_threshold = global_threshold;
        self.history_secs = history_secs;
    }

    /// History length for `history_secs` at the tick rate implied by `dt`
    pub fn history_len_for(history_secs: f32, dt: f32) -> usize {
        let fps = 1.0 / dt.max(FALLBACK_FRAME_TIME);
        let min = (history_secs * MIN_HISTORY_FPS).round() as usize;
        let max = (history_secs * MAX_HISTORY_FPS).round() as usize;
        ((history_secs * fps).round() as usize).clamp(min.max(1), max.max(1))
    }

    /// Reinitialize the detector.
    ///
    /// The history is refilled with the minimum-threshold floor and its
    /// running sums recomputed; all transient state is cleared.
    pub fn reset(&mut self, dt: f32) {
        let len = Self::history_len_for(self.history_secs, dt);
        let floor = self.tuning.min_threshold.max(0.0001);

        self.history.clear();
        self.history.resize(len, floor);
        self.history_index = 0;
        self.running_sum = floor as f64 * len as f64;
        self.running_sum_sq = (floor as f64 * floor as f64) * len as f64;

        self.beat_strength = 0.0;
        self.beat_timer = 0.0;
        self.cooldown_remaining = 0.0;
        self.peak_strength = 0.0;
        self.peak_hold = 0.0;
        self.current_energy = floor;
        self.current_threshold = floor;
        self.effective_threshold = 0.0;
        self.average_energy = floor;
        self.previous_energy = floor;
        self.variance = 0.0;
        self.confidence = 1.0;
        self.reset_threshold = 0.0;
        self.in_reset_phase = false;
        self.last_duration = 0.1;
        self.last_beat = None;

        trace!(
            "BeatDetector {} reset: history_len={}, floor={}",
            self.band_index,
            len,
            floor
        );
    }

    /// Seed the baseline from the first audible input after a reset.
    ///
    /// History, smoothed energy and threshold all start at the compressed
    /// `energy`, so a steady signal is not mistaken for a transient. The
    /// detector stays armed. Inputs below the silence floor leave it
    /// untouched.
    pub fn prime(&mut self, energy: f32) {
        let energy = finite_or_zero(energy);
        let min_threshold = self.tuning.min_threshold.max(0.0001);

        let compressed = self.compress(energy);
        if compressed < SILENCE_FLOOR {
            return;
        }

        let len = self.history.len();
        self.history.fill(compressed);
        self.history_index = 0;
        self.running_sum = compressed as f64 * len as f64;
        self.running_sum_sq = (compressed as f64 * compressed as f64) * len as f64;
        self.average_energy = compressed;
        self.variance = 0.0;
        self.previous_energy = compressed;

        self.current_threshold = compressed.max(min_threshold);
        self.effective_threshold = self.effective_for(self.current_threshold, compressed);
        self.current_energy = self.live_energy(compressed);
        self.in_reset_phase = false;
        self.reset_threshold = 0.0;

        trace!(
            "BeatDetector {} primed: energy={:.3}, threshold={:.3}",
            self.band_index,
            self.current_energy,
            self.effective_threshold
        );
    }

    /// Run one detection step on `energy` (a band output or the mean energy)
    pub fn detect(&mut self, energy: f32, silent: bool, dt: f32) {
        let energy = finite_or_zero(energy);

        if silent {
            self.beat_strength = lerp(self.beat_strength, 0.0, dt * 8.0);
            self.beat_timer = (self.beat_timer - dt * 2.0).max(0.0);
            self.current_energy = 0.0;
        }

        let tuning = self.tuning;
        let min_threshold = tuning.min_threshold.max(0.0001);
        let decay_rate = clamp01(tuning.decay_rate);

        let compressed = self.compress(energy);

        if compressed < SILENCE_FLOOR {
            let duration = self.last_duration.max(0.08);
            self.beat_strength = lerp(self.beat_strength, 0.0, dt * 6.0 * duration);
            self.beat_strength = lerp(
                self.beat_strength,
                self.beat_strength * tuning.beat_decay,
                dt,
            );
            self.beat_timer = (self.beat_timer - dt).max(0.0);
            self.cooldown_remaining = (self.cooldown_remaining - dt).max(0.0);
            self.confidence = lerp(self.confidence, 0.5, dt * 5.0);
            return;
        }

        // Rises pass straight through, falls are smoothed
        let smoothed = if compressed > self.previous_energy {
            compressed
        } else {
            lerp(self.previous_energy, compressed, lerp(0.4, 0.2, compressed))
        };

        self.push_history(smoothed);
        self.update_threshold(min_threshold, decay_rate, dt);
        self.previous_energy = smoothed;

        self.effective_threshold =
            self.effective_for(self.current_threshold, self.average_energy);
        self.current_energy = self.live_energy(smoothed);

        let mut fired_duration = 0.0;

        if self.in_reset_phase {
            let target = if self.current_energy >= self.effective_threshold {
                (self.current_energy * 0.96).max(EPSILON)
            } else {
                (self.effective_threshold * 0.95).max(min_threshold)
            };
            let tau = lerp(0.20, 0.05, clamp01(self.average_energy * 2.0));
            self.reset_threshold = lerp(self.reset_threshold, target, 1.0 - (-dt / tau).exp());

            if self.current_energy <= self.reset_threshold {
                self.in_reset_phase = false;
                trace!("BeatDetector {} re-armed", self.band_index);
            }
        }

        if !self.in_reset_phase {
            let excess = self.current_energy - self.effective_threshold;
            if excess > tuning.min_exceed {
                let denominator = self.effective_threshold.max(min_threshold).max(EPSILON);
                let strength = self.transient_strength(excess / denominator);
                fired_duration = self.fire(strength);
            }
        } else if self.current_energy > self.effective_threshold {
            let excess = self.current_energy - self.effective_threshold;
            let sustained = self.transient_strength(excess / self.effective_threshold);
            let energy_factor = clamp01(self.current_energy / self.effective_threshold);
            self.beat_strength = lerp(self.beat_strength, sustained, 0.5 + energy_factor * 0.5);
        }

        self.beat_timer = (self.beat_timer - dt).max(0.0);
        self.peak_hold = (self.peak_hold - dt).max(0.0);
        self.cooldown_remaining = (self.cooldown_remaining - dt).max(0.0);

        let decay_duration = if self.beat_timer > 0.0 {
            fired_duration.max(0.08)
        } else {
            self.last_duration.max(0.08)
        };

        if self.beat_timer > 0.0 {
            if self.peak_hold > 0.0 {
                self.beat_strength = lerp(self.beat_strength, self.peak_strength, dt * 20.0);
            } else {
                self.beat_strength = lerp(self.beat_strength, 0.0, dt * 8.0 * decay_duration);
                self.beat_strength = lerp(
                    self.beat_strength,
                    self.beat_strength * tuning.beat_decay,
                    dt,
                );
            }
        } else {
            self.beat_strength = lerp(self.beat_strength, 0.0, dt * 6.0 * decay_duration);
            self.beat_strength = lerp(
                self.beat_strength,
                self.beat_strength * tuning.beat_decay,
                dt,
            );
            self.peak_strength = lerp(
                self.peak_strength,
                self.peak_strength * tuning.beat_decay,
                dt * 0.9,
            );

            let near = inverse_lerp(
                self.effective_threshold * 0.9,
                self.effective_threshold * 1.1,
                self.current_energy,
            );
            self.confidence = clamp01(lerp(
                self.confidence,
                0.5 + (near - 0.5) * 0.4,
                dt * 2.0,
            ));
        }
    }

    /// Shape a compressed energy into the domain beats are compared in
    fn live_energy(&self, compressed: f32) -> f32 {
        let exponent = if self.class == BandClass::Bass { 1.0 } else { 0.85 };
        let sensitivity = self.tuning.sensitivity.max(0.001) * self.global_sensitivity;
        compressed.max(0.0).powf(exponent) * sensitivity
    }

    /// Effective threshold for a smoothed `threshold` over a history mean of
    /// `average`, both compressed
    fn effective_for(&self, threshold: f32, average: f32) -> f32 {
        let scaled = self.live_energy(threshold) * self.tuning.threshold_multiplier.max(0.01);
        scaled.max(self.live_energy(average)) * self.global_threshold
    }

    /// Log-compress a raw energy, compressing harder in loud context
    fn compress(&self, energy: f32) -> f32 {
        if energy <= 0.0 {
            return 0.0;
        }
        let dynamic_compression = lerp(1.0, 0.6, self.average_energy);
        (1.0 + energy * 50.0 * dynamic_compression).log10() / 2.0
    }

    fn push_history(&mut self, value: f32) {
        let oldest = self.history[self.history_index] as f64;
        self.running_sum -= oldest;
        self.running_sum_sq -= oldest * oldest;

        let value = value as f64;
        self.history[self.history_index] = value as f32;
        self.running_sum += value;
        self.running_sum_sq += value * value;
        self.history_index = (self.history_index + 1) % self.history.len();

        let n = self.history.len().max(1) as f64;
        let mean = self.running_sum / n;
        self.average_energy = mean as f32;
        self.variance = ((self.running_sum_sq / n) - mean * mean).max(0.0) as f32;
    }

    fn update_threshold(&mut self, min_threshold: f32, decay_rate: f32, dt: f32) {
        let avg = self.average_energy;
        let var = self.variance;

        let stability = if avg > EPSILON {
            clamp01(var / (avg + EPSILON))
        } else {
            0.0
        };
        let dynamic_multiplier = lerp(1.5, 4.5, stability);
        let variance_scale = (1.55 - 15.0 * var).clamp(0.1, 2.5);
        let mut target = lerp(
            avg + var * dynamic_multiplier,
            avg * variance_scale,
            stability * 1.1,
        );
        if var > 0.5 * avg {
            target *= lerp(1.1, 1.5, stability);
        }

        let rate = (decay_rate * dt * (1.0 + avg)).min(0.35);
        let from = if self.current_threshold <= 0.0 {
            target
        } else {
            self.current_threshold
        };
        self.current_threshold = lerp(from, target, rate);

        // Compares last tick's energy with last tick's effective threshold
        if self.class == BandClass::Bass
            && self.current_energy > self.live_energy(avg) * 1.05
            && self.current_energy > self.effective_threshold
        {
            let stick = 1.0 - (-dt / 0.05).exp();
            self.current_threshold =
                lerp(self.current_threshold, self.previous_energy * 0.98, stick);
        }

        self.current_threshold = self.current_threshold.max(min_threshold);
    }

    fn transient_strength(&self, relative_excess: f32) -> f32 {
        let transient = clamp01(clamp01(relative_excess) / 1.5).powf(0.6);
        let damp = 1.0 - clamp01(self.average_energy * 0.65);
        (transient * (0.85 + self.average_energy * 0.5) * damp).clamp(0.0, 3.0)
    }

    fn base_duration(&self) -> f32 {
        match self.class {
            BandClass::Bass => 0.12,
            BandClass::Mid => 0.10,
            BandClass::High => 0.08,
        }
    }

    /// Start a beat pulse; returns its duration
    fn fire(&mut self, strength: f32) -> f32 {
        let base = self.base_duration();
        let duration = (base + strength * 0.10).clamp(base, base * 2.0);

        self.beat_strength = strength;
        self.peak_strength = strength;
        self.beat_timer = duration;
        self.last_duration = duration;
        self.peak_hold = duration * 0.5;
        self.cooldown_remaining = self.tuning.cooldown.max(0.01);
        self.confidence = clamp01(0.6 + strength * 0.35);

        self.in_reset_phase = true;
        self.reset_threshold = self.effective_threshold * lerp(0.2, 0.9, strength);

        self.last_beat = Some(BeatEvent {
            energy: self.current_energy,
            threshold: self.effective_threshold,
            strength,
            duration,
        });

        debug!(
            "Beat on band {}: strength={:.2}, energy={:.3}, threshold={:.3}, duration={:.3}",
            self.band_index, strength, self.current_energy, self.effective_threshold, duration
        );
        duration
    }

    /// Band index this detector was created for
    pub fn band_index(&self) -> usize {
        self.band_index
    }

    /// Current beat strength (0..=3)
    pub fn beat_strength(&self) -> f32 {
        self.beat_strength
    }

    /// Seconds left in the current beat pulse
    pub fn beat_timer(&self) -> f32 {
        self.beat_timer
    }

    /// Current compressed, sensitivity-adjusted energy
    pub fn current_energy(&self) -> f32 {
        self.current_energy
    }

    /// Threshold energy must exceed to fire
    pub fn effective_threshold(&self) -> f32 {
        self.effective_threshold
    }

    /// Lower hysteresis threshold
    pub fn reset_threshold(&self) -> f32 {
        self.reset_threshold
    }

    /// Whether the detector waits for energy to drop before re-arming
    pub fn in_reset_phase(&self) -> bool {
        self.in_reset_phase
    }

    /// Mean of the energy history
    pub fn average_energy(&self) -> f32 {
        self.average_energy
    }

    /// Variance of the energy history
    pub fn variance(&self) -> f32 {
        self.variance
    }

    /// Detection confidence (0..1)
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Energy history (ring buffer order)
    pub fn history(&self) -> &[f32] {
        &self.history
    }

    /// Running sum of the history buffer
    pub fn running_sum(&self) -> f64 {
        self.running_sum
    }

    /// Current tuning
    pub fn tuning(&self) -> &BandTuning {
        &self.tuning
    }

    /// Current state
    pub fn phase(&self) -> DetectorPhase {
        if self.beat_timer > 0.0 {
            DetectorPhase::Triggered
        } else if self.in_reset_phase {
            DetectorPhase::ResetPhase
        } else {
            DetectorPhase::Tracking
        }
    }

    /// Debug view of the detector internals
    pub fn debug_state(&self) -> DetectorDebug {
        DetectorDebug {
            band_index: self.band_index,
            phase: self.phase(),
            current_energy: self.current_energy,
            current_threshold: self.current_threshold,
            effective_threshold: self.effective_threshold,
            reset_threshold: self.reset_threshold,
            average_energy: self.average_energy,
            variance: self.variance,
            confidence: self.confidence,
            cooldown_remaining: self.cooldown_remaining,
            last_beat: self.last_beat,
        }
    }
}

impl BeatSource for BeatDetector {
    fn beat_strength(&self) -> f32 {
        self.beat_strength
    }
}
