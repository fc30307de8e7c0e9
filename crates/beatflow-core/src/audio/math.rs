//! Small interpolation helpers shared by the audio stages.
//!
//! `lerp` clamps its factor to 0..1, so a large `dt * rate` snaps to the
//! target instead of overshooting.

/// Linear interpolation with `t` clamped to 0..1
#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    let t = clamp01(t);
    a + (b - a) * t
}

/// Position of `value` between `a` and `b`, clamped to 0..1
#[inline]
pub(crate) fn inverse_lerp(a: f32, b: f32, value: f32) -> f32 {
    if (b - a).abs() <= f32::EPSILON {
        0.0
    } else {
        clamp01((value - a) / (b - a))
    }
}

#[inline]
pub(crate) fn clamp01(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Replace NaN/Inf with zero
#[inline]
pub(crate) fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_clamps_factor() {
        assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
        assert_eq!(lerp(0.0, 10.0, 3.0), 10.0);
        assert_eq!(lerp(0.0, 10.0, -1.0), 0.0);
        assert_eq!(lerp(2.0, 4.0, f32::NAN), 2.0);
    }

    #[test]
    fn test_inverse_lerp() {
        assert_eq!(inverse_lerp(60.0, 16000.0, 60.0), 0.0);
        assert_eq!(inverse_lerp(60.0, 16000.0, 20000.0), 1.0);
        assert_eq!(inverse_lerp(1.0, 1.0, 5.0), 0.0);
    }
}
