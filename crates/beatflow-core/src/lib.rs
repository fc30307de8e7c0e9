//! BeatFlow Core - Real-time audio-to-beat analysis
//!
//! This crate turns a live magnitude spectrum into bounded signals for
//! audio-reactive visuals:
//! - Gaussian smoothing across spectrum bins
//! - Band decomposition with adaptive gain and noise-floor gating
//! - Per-band beat detection with dual-threshold hysteresis
//! - Cross-band beat coordination (combined strength and pulse)
//!
//! The pipeline is driven once per display tick through [`AudioProcessor`].
//! Rendering, settings persistence and UI are left to the host.

#![warn(missing_docs)]

use thiserror::Error;

pub mod audio;
pub mod config;
pub mod logging;

// --- Re-exports grouped by category ---

// Audio pipeline
pub use audio::{
    is_silent_spectrum, AudioFrame, AudioProcessor, BandClass, BandDecomposer, BandRange,
    BeatCoordinator, BeatDetector, BeatEvent, BeatSource, DetectorDebug, DetectorPhase,
    GaussianSmoother, SpectrumSource, TrackChangeDetector, WindowFunction,
};

#[cfg(feature = "fft")]
pub use audio::FftSpectrumSource;

// Configuration
pub use config::{parse_csv_floats, BandField, BandTuning, ProcessorConfig};

// Logging
pub use logging::LogConfig;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration failed strict validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
