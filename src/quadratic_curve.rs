//!
//! Quadratic polynomial with robust root finding.
//!

use crate::math::{clamp, clamp_near_zero, Interval};

/// 2^22, the precision of the f32 significand that we trust.
const EPSILON_PRECISION: f32 = (1 << 22) as f32;
const EPSILON_SCALE: f32 = 1.0 / EPSILON_PRECISION;

/// Powers of two in this exponent range can be inverted without overflow.
const MAX_INVERTABLE_EXPONENT: i32 = 126;
const MIN_INVERTABLE_POWER_OF_2: f32 = 1.0 / (1u128 << 126) as f32;
const MAX_INVERTABLE_POWER_OF_2: f32 = (1u128 << 126) as f32;

/// `c[2] * x^2 + c[1] * x + c[0]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuadraticCurve {
    c: [f32; 3],
}

impl QuadraticCurve {
    pub fn new(c2: f32, c1: f32, c0: f32) -> QuadraticCurve {
        return QuadraticCurve { c: [c0, c1, c2] };
    }

    #[inline]
    pub fn coeff(&self, i: usize) -> f32 {
        return self.c[i];
    }

    #[inline]
    pub fn evaluate(&self, x: f32) -> f32 {
        return (self.c[2] * x + self.c[1]) * x + self.c[0];
    }

    #[inline]
    pub fn derivative(&self, x: f32) -> f32 {
        return 2.0 * self.c[2] * x + self.c[1];
    }

    #[inline]
    pub fn second_derivative(&self) -> f32 {
        return 2.0 * self.c[2];
    }

    /// x at which the derivative is zero. Only meaningful for true quadratics.
    #[inline]
    pub fn critical_point(&self) -> f32 {
        return -(self.c[1] / self.c[2]) * 0.5;
    }

    #[inline]
    pub fn discriminant(&self) -> f32 {
        return self.c[1] * self.c[1] - 4.0 * self.c[2] * self.c[0];
    }

    /// Largest absolute coefficient.
    #[inline]
    pub fn max_coeff(&self) -> f32 {
        return self.c[0].abs().max(self.c[1].abs()).max(self.c[2].abs());
    }

    #[inline]
    pub fn epsilon(&self, x: f32) -> f32 {
        return x * EPSILON_SCALE;
    }

    #[inline]
    pub fn epsilon_of_coefficients(&self) -> f32 {
        return self.epsilon(self.max_coeff());
    }

    /// Values below this are considered zero when evaluating near `max_x`.
    #[inline]
    pub fn epsilon_in_interval(&self, max_x: f32) -> f32 {
        return self.epsilon(max_x.abs().max(self.max_coeff()));
    }

    pub fn shift_left(&mut self, x_shift: f32) {
        if x_shift == 0.0 {
            return;
        }
        let b = self.derivative(x_shift);
        let a = self.evaluate(x_shift);
        self.c[0] = a;
        self.c[1] = b;
    }

    #[inline]
    pub fn scale_in_y(&self, y_scale: f32) -> QuadraticCurve {
        return QuadraticCurve::new(self.c[2] * y_scale, self.c[1] * y_scale, self.c[0] * y_scale);
    }

    /// Curve `q(x * x_scale_reciprocal)`.
    #[inline]
    pub fn scale_in_x_by_reciprocal(&self, x_scale_reciprocal: f32) -> QuadraticCurve {
        return QuadraticCurve::new(
            self.c[2] * x_scale_reciprocal * x_scale_reciprocal,
            self.c[1] * x_scale_reciprocal,
            self.c[0],
        );
    }

    fn abs_coeff(&self) -> QuadraticCurve {
        return QuadraticCurve::new(self.c[2].abs(), self.c[1].abs(), self.c[0].abs());
    }

    /// Real roots in ascending order.
    ///
    /// The curve is first rescaled by powers of two in x and y so that the
    /// coefficients are near 1, which keeps the discriminant meaningful for
    /// very large or very small inputs.
    pub fn roots(&self) -> Vec<f32> {
        let abs = self.abs_coeff();
        let scale_with_linear = abs.c[1] >= abs.c[0];
        let comparison_coeff = abs.c[1].max(abs.c[0]);
        let x_scale_quotient = abs.c[2] / comparison_coeff;
        let x_scale_reciprocal_unclamped = if !inside_invertable_range(x_scale_quotient) {
            1.0
        } else if scale_with_linear {
            reciprocal_exponent(x_scale_quotient)
        } else {
            sqrt_reciprocal_exponent(x_scale_quotient)
        };
        let x_scale_reciprocal_max = max_power_of_2_scale(abs.c[1], MAX_INVERTABLE_EXPONENT);
        let x_scale_reciprocal = x_scale_reciprocal_unclamped.min(x_scale_reciprocal_max);
        let x_scaled = self.scale_in_x_by_reciprocal(x_scale_reciprocal);
        let x_scaled_abs = x_scaled.abs_coeff();

        let y_scale_unclamped = reciprocal_exponent(clamp(
            x_scaled_abs.c[2],
            MIN_INVERTABLE_POWER_OF_2,
            MAX_INVERTABLE_POWER_OF_2,
        ));
        let y_scale_max = max_power_of_2_scale(x_scaled_abs.c[0], MAX_INVERTABLE_EXPONENT - 1)
            .min(max_power_of_2_scale(x_scaled_abs.c[1], MAX_INVERTABLE_EXPONENT - 1));
        let y_scale = y_scale_max.min(y_scale_unclamped);

        let mut roots = x_scaled.scale_in_y(y_scale).roots_without_normalizing();
        for root in roots.iter_mut() {
            *root *= x_scale_reciprocal;
        }
        return roots;
    }

    fn roots_without_normalizing(&self) -> Vec<f32> {
        let epsilon = self.epsilon_of_coefficients();
        if self.c[2].abs() < epsilon {
            // Linear, or constant.
            if self.c[1].abs() < epsilon {
                return Vec::new();
            }
            return vec![-self.c[0] / self.c[1]];
        }

        let discriminant = clamp_near_zero(self.discriminant(), epsilon);
        if discriminant < 0.0 {
            return Vec::new();
        }

        let divisor = (1.0 / self.c[2]) * 0.5;
        if discriminant == 0.0 {
            return vec![-self.c[1] * divisor];
        }

        let sqrt_discriminant = discriminant.sqrt();
        let root_minus = (-self.c[1] - sqrt_discriminant) * divisor;
        let root_plus = (-self.c[1] + sqrt_discriminant) * divisor;
        return vec![root_minus.min(root_plus), root_minus.max(root_plus)];
    }

    /// Roots that fall within `valid_x`, allowing a small tolerance at the
    /// edges. Roots in the tolerance band are clamped onto the interval.
    pub fn roots_in_interval(&self, valid_x: &Interval) -> Vec<f32> {
        let epsilon_x = valid_x.size() * EPSILON_SCALE;
        let mut roots = self.roots();
        roots.retain_mut(|root| {
            let clamped = valid_x.clamp(*root);
            let keep = (*root - clamped).abs() <= epsilon_x;
            *root = clamped;
            keep
        });
        return roots;
    }

    /// Sub-intervals of `x_limits` where the curve has the same sign as
    /// `sign` (zero counts as matching). At most two.
    pub fn intervals_matching_sign(&self, x_limits: &Interval, sign: f32) -> Vec<Interval> {
        let roots = self.roots_in_interval(x_limits);
        let valid_at_start = sign * self.evaluate(x_limits.min) >= 0.0;
        let valid_at_end = sign * self.evaluate(x_limits.max) >= 0.0;

        if roots.is_empty() {
            if valid_at_start {
                return vec![*x_limits];
            }
            return Vec::new();
        }

        if roots.len() == 2 && valid_at_start {
            return vec![
                Interval::new(x_limits.min, roots[0]),
                Interval::new(roots[1], x_limits.max),
            ];
        }

        let start = if valid_at_start { x_limits.min } else { roots[0] };
        let end = if valid_at_end {
            x_limits.max
        } else if roots.len() == 2 {
            roots[1]
        } else {
            roots[0]
        };
        return vec![Interval::new(start, end)];
    }
}

#[inline]
fn inside_invertable_range(x: f32) -> bool {
    return MIN_INVERTABLE_POWER_OF_2 <= x && x <= MAX_INVERTABLE_POWER_OF_2;
}

/// Exponent of `x` as in `x = m * 2^e` with `1 <= m < 2`.
#[inline]
fn exponent(x: f32) -> i32 {
    return ((x.to_bits() >> 23) & 0xFF) as i32 - 127;
}

#[inline]
fn power_of_2(e: i32) -> f32 {
    return 2f32.powi(e.clamp(-MAX_INVERTABLE_EXPONENT, MAX_INVERTABLE_EXPONENT));
}

/// `2^-e`, where `e` is the exponent of `x`.
#[inline]
fn reciprocal_exponent(x: f32) -> f32 {
    return power_of_2(-exponent(x));
}

/// `2^(-e/2)`, where `e` is the exponent of `x`.
#[inline]
fn sqrt_reciprocal_exponent(x: f32) -> f32 {
    return power_of_2(-exponent(x) / 2);
}

/// Largest power of two that `x` can be multiplied by while staying below `2^max_exponent`.
#[inline]
fn max_power_of_2_scale(x: f32, max_exponent: i32) -> f32 {
    return power_of_2(max_exponent - exponent(x));
}
