//! Track-change polling
//!
//! Hosts report what is playing (a track title, device name or any other
//! identity string); [`TrackChangeDetector`] decides at a fixed polling
//! interval whether it changed, so detectors can be reset for the new track.

use tracing::info;

/// Default seconds between identity checks
pub const DEFAULT_POLL_INTERVAL_SECS: f32 = 0.5;

/// Polls a source identity and reports changes
#[derive(Debug, Clone)]
pub struct TrackChangeDetector {
    interval: f32,
    elapsed: f32,
    last_identity: Option<String>,
    initialized: bool,
}

impl Default for TrackChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL_SECS)
    }
}

impl TrackChangeDetector {
    /// Create a detector that checks every `interval` seconds
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            elapsed: 0.0,
            last_identity: None,
            initialized: false,
        }
    }

    /// Advance by `dt` and compare `identity` with the last one seen.
    ///
    /// Returns `true` when a check ran and the identity differs. The first
    /// identity ever observed is adopted without reporting a change.
    pub fn observe(&mut self, identity: Option<&str>, dt: f32) -> bool {
        self.elapsed += dt.max(0.0);
        if self.initialized && self.elapsed < self.interval {
            return false;
        }
        self.elapsed = 0.0;

        if !self.initialized {
            self.initialized = true;
            self.last_identity = identity.map(str::to_owned);
            return false;
        }

        if self.last_identity.as_deref() == identity {
            return false;
        }

        info!(
            "Track changed: {:?} -> {:?}",
            self.last_identity.as_deref().unwrap_or("<none>"),
            identity.unwrap_or("<none>")
        );
        self.last_identity = identity.map(str::to_owned);
        true
    }
}
