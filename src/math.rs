//!
//! Scalar helpers, intervals and the affine `Transform` value.
//!

use glam::{Mat4, Quat, Vec3};

/// Closed numeric range `[min, max]`.
///
/// A range with `min > max` is empty and has negative size.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "rkyv", derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize))]
#[cfg_attr(feature = "rkyv", archive(check_bytes))]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Default for Interval {
    fn default() -> Interval {
        return Interval::new(0.0, 0.0);
    }
}

impl Interval {
    #[inline]
    pub const fn new(min: f32, max: f32) -> Interval {
        return Interval { min, max };
    }

    /// The interval that contains nothing, `included()` grows it.
    #[inline]
    pub const fn empty() -> Interval {
        return Interval {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        };
    }

    #[inline]
    pub fn size(&self) -> f32 {
        return self.max - self.min;
    }

    #[inline]
    pub fn middle(&self) -> f32 {
        return 0.5 * (self.min + self.max);
    }

    #[inline]
    pub fn contains(&self, x: f32) -> bool {
        return self.min <= x && x <= self.max;
    }

    #[inline]
    pub fn clamp(&self, x: f32) -> f32 {
        return clamp(x, self.min, self.max);
    }

    /// Value at `percent` of the way from `min` to `max`.
    #[inline]
    pub fn lerp(&self, percent: f32) -> f32 {
        return lerp(self.min, self.max, percent);
    }

    /// Grows the interval so that it contains `x`.
    #[inline]
    pub fn included(&self, x: f32) -> Interval {
        return Interval::new(self.min.min(x), self.max.max(x));
    }

    /// Scales the interval about its middle. `scaled(1.0)` is identity.
    /// A degenerate interval stays degenerate.
    #[inline]
    pub fn scaled(&self, scale: f32) -> Interval {
        let middle = self.middle();
        let half = 0.5 * self.size() * scale;
        return Interval::new(middle - half, middle + half);
    }

    /// Brings `x` into `(min, max]` by adding or subtracting `size()` a
    /// few times. Meant for values already near the interval; falls back
    /// to `normalize_wild_value` for values far away.
    pub fn normalize_close_value(&self, x: f32) -> f32 {
        const MAX_ADJUSTMENTS: usize = 4;

        let length = self.size();
        if !(length > 0.0) {
            return x;
        }

        let mut value = x;
        for _ in 0..MAX_ADJUSTMENTS {
            if value <= self.min {
                value += length;
            } else if value > self.max {
                value -= length;
            } else {
                return value;
            }
        }
        if self.min < value && value <= self.max {
            return value;
        }
        return self.normalize_wild_value(x);
    }

    /// Brings any finite `x` into `(min, max]`.
    pub fn normalize_wild_value(&self, x: f32) -> f32 {
        let length = self.size();
        if !(length > 0.0) || !x.is_finite() {
            return x;
        }

        let units = ((x - self.max) / length).ceil();
        let value = x - units * length;

        // Rounding at the boundaries.
        if value <= self.min {
            return value + length;
        }
        if value > self.max {
            return value - length;
        }
        return value;
    }

    /// Takes a difference `x` between two normalized values and returns the
    /// equivalent difference of smallest magnitude.
    #[inline]
    pub fn normalize_difference(&self, x: f32) -> f32 {
        let length = self.size();
        if x <= self.min {
            return x + length;
        }
        if x > self.max {
            return x - length;
        }
        return x;
    }
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    return a + (b - a) * t;
}

#[inline]
pub fn clamp(x: f32, min: f32, max: f32) -> f32 {
    return x.max(min).min(max);
}

/// Returns 0 if `|x| < epsilon`, otherwise `x`.
#[inline]
pub fn clamp_near_zero(x: f32, epsilon: f32) -> f32 {
    return if x.abs() < epsilon { 0.0 } else { x };
}

/// Affine transform: translation, rotation then scale.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Transform {
        return Transform::identity();
    }
}

impl Transform {
    #[inline]
    pub const fn identity() -> Transform {
        return Transform {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        };
    }

    /// Column-major matrix `T * R * S`.
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        return Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
    }
}
