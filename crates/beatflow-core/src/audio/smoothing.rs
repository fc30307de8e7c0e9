//! Gaussian smoothing across spectrum bins.
//!
//! A separable 1-D Gaussian blur suppresses single-bin noise before bins are
//! aggregated into bands. Edges clamp to the first/last bin.

use crate::config::KERNEL_SIZE_RANGE;

/// Build a normalized Gaussian kernel of `size` taps with sigma `intensity`.
///
/// `size` is forced odd and clamped to the supported range; a non-positive
/// intensity degrades to a near-delta kernel.
pub fn gaussian_kernel(size: usize, intensity: f32) -> Vec<f32> {
    let size = normalize_kernel_size(size);
    let half = (size / 2) as i32;
    let sigma = if intensity.is_finite() && intensity > 0.0 {
        intensity
    } else {
        1e-3
    };
    let two_sigma_sq = 2.0 * sigma * sigma;
    let scale = (2.0 * std::f32::consts::PI).sqrt() * sigma;

    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / two_sigma_sq).exp() / scale)
        .collect();

    let sum: f32 = kernel.iter().sum();
    if sum > 0.0 {
        kernel.iter_mut().for_each(|k| *k /= sum);
    } else {
        kernel.iter_mut().for_each(|k| *k = 0.0);
        kernel[half as usize] = 1.0;
    }
    kernel
}

fn normalize_kernel_size(size: usize) -> usize {
    let size = if size % 2 == 0 { size + 1 } else { size };
    size.clamp(KERNEL_SIZE_RANGE.0, KERNEL_SIZE_RANGE.1)
}

/// Spectrum smoother with a cached kernel
#[derive(Debug, Clone, Default)]
pub struct GaussianSmoother {
    kernel: Vec<f32>,
    /// (size, intensity) the cached kernel was built for
    cache_key: Option<(usize, f32)>,
    scratch: Vec<f32>,
}

impl GaussianSmoother {
    /// Create a smoother with an empty kernel cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The kernel used by the most recent call to [`Self::smooth_in_place`]
    pub fn kernel(&self) -> &[f32] {
        &self.kernel
    }

    fn ensure_kernel(&mut self, size: usize, intensity: f32) {
        let size = normalize_kernel_size(size);
        let stale = match self.cache_key {
            Some((cached_size, cached_intensity)) => {
                cached_size != size
                    || (cached_intensity - intensity).abs()
                        > f32::EPSILON * cached_intensity.abs().max(1.0)
            }
            None => true,
        };
        if stale {
            self.kernel = gaussian_kernel(size, intensity);
            self.cache_key = Some((size, intensity));
        }
    }

    /// Blur `spectrum` in place. Empty input is a no-op.
    pub fn smooth_in_place(&mut self, spectrum: &mut [f32], size: usize, intensity: f32) {
        if spectrum.is_empty() {
            return;
        }
        self.ensure_kernel(size, intensity);

        let len = spectrum.len();
        let half = (self.kernel.len() / 2) as isize;
        let last = (len - 1) as isize;

        self.scratch.clear();
        self.scratch.extend((0..len as isize).map(|i| {
            self.kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let idx = (i + k as isize - half).clamp(0, last) as usize;
                    spectrum[idx] * weight
                })
                .sum::<f32>()
        }));

        spectrum.copy_from_slice(&self.scratch);
    }
}
