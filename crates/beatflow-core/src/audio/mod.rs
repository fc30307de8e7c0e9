//! Audio analysis pipeline
//!
//! Spectrum capture, smoothing, band decomposition, beat detection and
//! coordination, driven by [`AudioProcessor`].

mod math;

pub mod bands;
pub mod coordinator;
pub mod detector;
pub mod processor;
pub mod smoothing;
pub mod spectrum;
pub mod track;

pub use bands::{
    band_edges_hz, compute_band_ranges, perceptual_weights, BandClass, BandDecomposer, BandRange,
    BandState,
};
pub use coordinator::BeatCoordinator;
pub use detector::{BeatDetector, BeatEvent, BeatSource, DetectorDebug, DetectorPhase};
pub use processor::{AudioFrame, AudioProcessor};
pub use smoothing::{gaussian_kernel, GaussianSmoother};
#[cfg(feature = "fft")]
pub use spectrum::FftSpectrumSource;
pub use spectrum::{is_silent_spectrum, SpectrumSource, WindowFunction};
pub use track::TrackChangeDetector;
