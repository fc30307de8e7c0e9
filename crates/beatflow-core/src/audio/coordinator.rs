//! Cross-band beat coordination
//!
//! Folds every detector's beat strength into one combined strength and a
//! smoothed pulse for consumers that don't need per-band detail.

use super::detector::BeatSource;
use super::math::lerp;

/// Combined strength above which the pulse follows hits quickly
const LOUD_STRENGTH: f32 = 0.3;
const LOUD_PULSE_RATE: f32 = 25.0;
const CALM_PULSE_RATE: f32 = 8.0;
/// Rate at which the pulse relaxes to 1.0 when every weight is zero
const IDLE_PULSE_RATE: f32 = 5.0;

/// Aggregates detector outputs into a combined strength and pulse
#[derive(Debug, Clone)]
pub struct BeatCoordinator {
    combined_strength: f32,
    pulse: f32,
    /// Per-source weights. Only consulted to detect an all-zero weight set;
    /// the combined strength is the unweighted maximum.
    band_weights: Vec<f32>,
}

impl Default for BeatCoordinator {
    fn default() -> Self {
        Self {
            combined_strength: 0.0,
            pulse: 1.0,
            band_weights: Vec::new(),
        }
    }
}

impl BeatCoordinator {
    /// Create a coordinator at rest (pulse 1.0)
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the per-source weights. Missing entries count as 1.0.
    pub fn set_band_weights(&mut self, weights: &[f32]) {
        self.band_weights.clear();
        self.band_weights.extend_from_slice(weights);
    }

    /// Update from the current detectors. `None` entries are skipped.
    pub fn update<'a, I, S>(&mut self, sources: I, dt: f32)
    where
        I: IntoIterator<Item = Option<&'a S>>,
        S: BeatSource + ?Sized + 'a,
    {
        let mut total_weight = 0.0f32;
        let mut max_strength = 0.0f32;
        let mut any = false;

        for (i, source) in sources.into_iter().enumerate() {
            let Some(source) = source else {
                continue;
            };
            any = true;
            total_weight += self.band_weights.get(i).copied().unwrap_or(1.0);
            let strength = source.beat_strength();
            if strength > max_strength {
                max_strength = strength;
            }
        }

        if !any || total_weight.abs() <= f32::EPSILON {
            self.combined_strength = 0.0;
            self.pulse = lerp(self.pulse, 1.0, dt * IDLE_PULSE_RATE);
            return;
        }

        self.combined_strength = max_strength;
        let target = 1.0 + 2.0 * max_strength;
        let rate = if max_strength > LOUD_STRENGTH {
            LOUD_PULSE_RATE
        } else {
            CALM_PULSE_RATE
        };
        self.pulse = lerp(self.pulse, target, dt * rate);
    }

    /// Maximum beat strength over all sources on the last update
    pub fn combined_strength(&self) -> f32 {
        self.combined_strength
    }

    /// Smoothed pulse, tracking `1 + 2 * combined_strength`
    pub fn pulse(&self) -> f32 {
        self.pulse
    }

    /// Return to rest
    pub fn reset(&mut self) {
        self.combined_strength = 0.0;
        self.pulse = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f32);

    impl BeatSource for Fixed {
        fn beat_strength(&self) -> f32 {
            self.0
        }
    }

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_combined_is_max_not_sum() {
        let sources = [Fixed(0.2), Fixed(0.9), Fixed(0.1)];
        let mut coordinator = BeatCoordinator::new();
        coordinator.update(sources.iter().map(Some), DT);
        assert_eq!(coordinator.combined_strength(), 0.9);
    }

    #[test]
    fn test_missing_sources_are_skipped() {
        let a = Fixed(0.4);
        let c = Fixed(0.7);
        let mut coordinator = BeatCoordinator::new();
        coordinator.update([Some(&a), None, Some(&c)], DT);
        assert_eq!(coordinator.combined_strength(), 0.7);
    }

    #[test]
    fn test_weights_do_not_change_combined() {
        let sources = [Fixed(0.2), Fixed(0.9)];
        let mut coordinator = BeatCoordinator::new();
        coordinator.set_band_weights(&[5.0, 0.01]);
        coordinator.update(sources.iter().map(Some), DT);
        assert_eq!(coordinator.combined_strength(), 0.9);
    }

    #[test]
    fn test_zero_weights_relax_pulse() {
        let sources = [Fixed(1.0), Fixed(1.0)];
        let mut coordinator = BeatCoordinator::new();
        coordinator.update(sources.iter().map(Some), DT);
        assert!(coordinator.pulse() > 1.0);

        coordinator.set_band_weights(&[0.0, 0.0]);
        for _ in 0..120 {
            coordinator.update(sources.iter().map(Some), DT);
        }
        assert_eq!(coordinator.combined_strength(), 0.0);
        assert!((coordinator.pulse() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_pulse_tracks_target() {
        let loud = [Fixed(1.0)];
        let mut coordinator = BeatCoordinator::new();
        for _ in 0..60 {
            coordinator.update(loud.iter().map(Some), DT);
        }
        assert!((coordinator.pulse() - 3.0).abs() < 1e-3);

        let quiet = [Fixed(0.0)];
        for _ in 0..120 {
            coordinator.update(quiet.iter().map(Some), DT);
        }
        assert!((coordinator.pulse() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_pulse_starts_at_rest() {
        let coordinator = BeatCoordinator::new();
        assert_eq!(coordinator.pulse(), 1.0);
        assert_eq!(coordinator.combined_strength(), 0.0);
    }
}
