use beatflow_core::{
    AudioProcessor, BandTuning, BeatCoordinator, BeatDetector, BeatSource, DetectorPhase,
    FftSpectrumSource, ProcessorConfig, WindowFunction,
};
use proptest::prelude::*;

const DT: f32 = 1.0 / 60.0;
const SAMPLE_RATE: f32 = 48000.0;
const BINS: usize = 1024;

fn active_processor() -> AudioProcessor {
    let mut processor = AudioProcessor::new(ProcessorConfig::default(), SAMPLE_RATE);
    processor.activate();
    processor
}

/// Pseudo-random but reproducible spectrum
fn noisy_spectrum(seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..BINS)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 1000) as f32 / 1000.0 * 0.3
        })
        .collect()
}

#[test]
fn test_constant_spectrum_settles_without_beats() {
    let mut processor = active_processor();
    let spectrum = vec![0.5; BINS];

    let mut previous = Vec::new();
    for _ in 0..100 {
        previous = processor.band_energies().to_vec();
        processor.process_spectrum(&spectrum, false, DT);
    }

    let frame = processor.snapshot();
    for (band, (&now, &before)) in frame.band_energies.iter().zip(&previous).enumerate() {
        assert!(now > 0.01, "band {} did not pick up energy", band);
        assert!(
            ((now - before) / before).abs() < 0.01,
            "band {} still moving: {} -> {}",
            band,
            before,
            now
        );
    }
    for debug in &frame.detectors {
        assert!(
            debug.last_beat.is_none(),
            "detector {} fired on constant input",
            debug.band_index
        );
        assert_ne!(debug.phase, DetectorPhase::ResetPhase);
    }
    for detector in processor
        .band_detectors()
        .iter()
        .chain(std::iter::once(processor.general_detector()))
    {
        assert!(
            detector.beat_strength() < 1e-3,
            "detector {} holds strength {}",
            detector.band_index(),
            detector.beat_strength()
        );
    }
    assert!(frame.combined_beat_strength < 1e-3);
    assert!((frame.pulse - 1.0).abs() < 1e-3, "pulse {}", frame.pulse);
}

/// Uniform background, then band 0's bins at 10x for one tick
fn assert_bass_spike_fires_once(level: f32) {
    let mut processor = active_processor();
    let background = vec![level; BINS];
    for _ in 0..300 {
        processor.process_spectrum(&background, false, DT);
    }
    assert!(processor.band_detectors()[0].debug_state().last_beat.is_none());
    assert!(!processor.band_detectors()[0].in_reset_phase());
    assert_eq!(processor.band_beat_timer(0), 0.0);

    let bass = processor.band_ranges()[0];
    let mut spike = background.clone();
    spike[bass.start..=bass.end].fill(level * 10.0);
    processor.process_spectrum(&spike, false, DT);
    if processor.band_beat_timer(0) == 0.0 {
        processor.process_spectrum(&background, false, DT);
    }

    let timer = processor.band_beat_timer(0);
    assert!(
        timer > 0.1 && timer <= 0.24,
        "level {}: bass beat timer {}",
        level,
        timer
    );
    assert!(processor.band_beat_strength(0) > 0.0);
    assert!(processor.combined_beat_strength() > 0.0);
    let fired = processor.band_detectors()[0].debug_state().last_beat;

    // Timer only runs down; no second beat on a flat background
    let mut previous = timer;
    for _ in 0..180 {
        processor.process_spectrum(&background, false, DT);
        let now = processor.band_beat_timer(0);
        assert!(now <= previous, "timer rose from {} to {}", previous, now);
        previous = now;
    }
    assert_eq!(previous, 0.0);
    assert_eq!(processor.band_detectors()[0].debug_state().last_beat, fired);
    assert!(processor.band_beat_strength(0) < 0.05);
}

#[test]
fn test_bass_spike_fires_once() {
    for level in [0.01, 0.02, 0.05] {
        assert_bass_spike_fires_once(level);
    }
}

#[test]
fn test_coordinator_takes_maximum() {
    struct Mock(f32);
    impl BeatSource for Mock {
        fn beat_strength(&self) -> f32 {
            self.0
        }
    }

    let detectors = [Mock(0.2), Mock(0.9), Mock(0.1)];
    let mut coordinator = BeatCoordinator::new();
    coordinator.update(detectors.iter().map(Some), DT);
    assert_eq!(coordinator.combined_strength(), 0.9);
    assert!(coordinator.pulse() > 1.0);
}

#[test]
fn test_silence_converges_to_zero() {
    let mut processor = active_processor();
    for tick in 0..90 {
        processor.process_spectrum(&noisy_spectrum(tick), false, DT);
    }

    let silence = vec![0.0; BINS];
    for _ in 0..120 {
        processor.process_spectrum(&silence, false, DT);
    }

    assert!(processor.is_silent());
    for &energy in processor.band_energies() {
        assert!(energy < 1e-3, "band energy {}", energy);
    }
    for detector in processor
        .band_detectors()
        .iter()
        .chain(std::iter::once(processor.general_detector()))
    {
        assert!(detector.beat_strength() < 1e-3);
        assert_eq!(detector.beat_timer(), 0.0);
    }
    assert!((processor.pulse() - 1.0).abs() < 1e-2);
}

#[test]
fn test_identical_input_gives_identical_output() {
    let mut a = active_processor();
    let mut b = active_processor();
    for tick in 0..200 {
        let spectrum = noisy_spectrum(tick / 3);
        let silent = tick % 50 == 49;
        a.process_spectrum(&spectrum, silent, DT);
        b.process_spectrum(&spectrum, silent, DT);
        assert_eq!(a.snapshot(), b.snapshot(), "diverged at tick {}", tick);
    }
}

#[test]
fn test_detector_reset_is_idempotent() {
    let tuning = BandTuning::default_for_band(3);
    let mut detector = BeatDetector::new(3, tuning, 2.0, DT);
    for tick in 0..200 {
        let energy = if tick % 20 == 0 { 1.5 } else { 0.2 };
        detector.detect(energy, false, DT);
    }

    detector.reset(DT);
    let first = detector.clone();
    detector.reset(DT);
    assert_eq!(first, detector);

    let floor = tuning.min_threshold;
    assert!(detector.history().iter().all(|&v| v == floor));
    let expected = floor as f64 * detector.history().len() as f64;
    assert!((detector.running_sum() - expected).abs() < 1e-6);
    assert_eq!(detector.beat_strength(), 0.0);
    assert_eq!(detector.beat_timer(), 0.0);
    assert!(!detector.in_reset_phase());
}

#[test]
fn test_track_change_resets_detectors() {
    let mut processor = active_processor();
    for tick in 0..60 {
        processor.process_spectrum(&noisy_spectrum(tick), false, DT);
    }
    assert!(!processor.poll_track(Some("first"), DT));
    assert!(processor.poll_track(Some("second"), 1.0));

    for detector in processor.band_detectors() {
        assert_eq!(detector.beat_timer(), 0.0);
        assert!(!detector.in_reset_phase());
    }
    assert_eq!(processor.combined_beat_strength(), 0.0);
    assert_eq!(processor.pulse(), 1.0);
}

#[test]
fn test_fft_source_drives_processor() {
    let mut processor = active_processor();
    let mut source = FftSpectrumSource::new(SAMPLE_RATE, BINS, WindowFunction::BlackmanHarris);

    // 50 Hz tone, one display tick of samples at a time
    let per_tick = (SAMPLE_RATE * DT) as usize;
    let mut n = 0usize;
    for _ in 0..30 {
        let chunk: Vec<f32> = (0..per_tick)
            .map(|i| {
                let t = (n + i) as f32 / SAMPLE_RATE;
                (2.0 * std::f32::consts::PI * 50.0 * t).sin() * 0.5
            })
            .collect();
        n += per_tick;
        source.push_samples(&chunk);
        assert!(!processor.tick(&mut source, DT));
    }

    assert!(matches!(processor.dominant_band(), Some(0) | Some(1)));
}

#[test]
fn test_silent_source_reports_silence() {
    let mut processor = active_processor();
    let mut source = FftSpectrumSource::new(SAMPLE_RATE, BINS, WindowFunction::default());
    assert!(processor.tick(&mut source, DT));
    assert!(processor.is_silent());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_outputs_stay_bounded(
        ticks in prop::collection::vec(
            (prop::collection::vec(0.0f32..4.0, BINS), 0.0f32..0.1, prop::bool::weighted(0.1)),
            1..40,
        ),
    ) {
        let mut processor = active_processor();
        for (spectrum, dt, silent) in &ticks {
            processor.process_spectrum(spectrum, *silent, *dt);
            let frame = processor.snapshot();

            for &energy in &frame.band_energies {
                prop_assert!((0.0..=2.0).contains(&energy));
                if !frame.silent {
                    prop_assert!(energy >= 0.001);
                }
            }
            for detector in processor
                .band_detectors()
                .iter()
                .chain(std::iter::once(processor.general_detector()))
            {
                prop_assert!((0.0..=3.0).contains(&detector.beat_strength()));
                prop_assert!(detector.beat_timer() >= 0.0);
            }
            prop_assert!(frame.pulse >= 0.0 && frame.pulse.is_finite());
            prop_assert!((0.0..=3.0).contains(&frame.combined_beat_strength));
        }
    }

    #[test]
    fn prop_band_ranges_cover_spectrum(
        band_count in 1usize..16,
        sample_count in 128usize..4096,
    ) {
        let config = ProcessorConfig {
            band_count,
            sample_count,
            ..Default::default()
        };
        let processor = AudioProcessor::new(config, 44100.0);
        let ranges = processor.band_ranges();
        prop_assert_eq!(ranges.len(), band_count);
        prop_assert_eq!(ranges[0].start, 0);
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].start <= pair[0].end);
            if pair[0].end < sample_count - 1 {
                prop_assert_eq!(pair[1].start, pair[0].end + 1);
            }
        }
        prop_assert!(ranges[band_count - 1].end < sample_count);
    }
}
