//!
//! Cubic polynomial segments used to evaluate spline playback.
//!

use crate::math::{clamp_near_zero, Interval};

const EPSILON_SCALE: f32 = 1.0 / (1 << 22) as f32;

/// Boundary conditions of one cubic segment: y and slope at `x = 0` and at
/// `x = width_x`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CubicInit {
    pub start_y: f32,
    pub start_derivative: f32,
    pub end_y: f32,
    pub end_derivative: f32,
    pub width_x: f32,
}

impl CubicInit {
    #[inline]
    pub fn new(start_y: f32, start_derivative: f32, end_y: f32, end_derivative: f32, width_x: f32) -> CubicInit {
        return CubicInit {
            start_y,
            start_derivative,
            end_y,
            end_derivative,
            width_x,
        };
    }
}

/// `c[3] * x^3 + c[2] * x^2 + c[1] * x + c[0]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CubicCurve {
    c: [f32; 4],
}

impl CubicCurve {
    #[inline]
    pub fn new(c3: f32, c2: f32, c1: f32, c0: f32) -> CubicCurve {
        return CubicCurve { c: [c0, c1, c2, c3] };
    }

    /// Constant curve `y`.
    #[inline]
    pub fn constant(y: f32) -> CubicCurve {
        return CubicCurve::new(0.0, 0.0, 0.0, y);
    }

    /// Hermite cubic through the boundary conditions in `init`.
    pub fn from_init(init: &CubicInit) -> CubicCurve {
        let mut curve = CubicCurve::default();
        curve.init(init);
        return curve;
    }

    pub fn init(&mut self, init: &CubicInit) {
        //  f(x) = dx^3 + cx^2 + bx + a
        //
        //  f(0) = y0, f'(0) = s0, f(w) = y1, f'(w) = s1
        //  =>
        //  a = y0
        //  b = s0
        //  c = 1/w * (3m - 2s0 - s1)
        //  d = 1/w^2 * (s0 + s1 - 2m)
        //  where m = (y1 - y0) / w
        let w = init.width_x;
        if !(w > 0.0) {
            self.c = [init.start_y, 0.0, 0.0, 0.0];
            return;
        }
        let w_inv = 1.0 / w;
        let m = (init.end_y - init.start_y) * w_inv;
        self.c[0] = init.start_y;
        self.c[1] = init.start_derivative;
        self.c[2] = w_inv * (3.0 * m - 2.0 * init.start_derivative - init.end_derivative);
        self.c[3] = w_inv * w_inv * (init.start_derivative + init.end_derivative - 2.0 * m);
    }

    #[inline]
    pub fn coeff(&self, i: usize) -> f32 {
        return self.c[i];
    }

    #[inline]
    pub fn evaluate(&self, x: f32) -> f32 {
        return ((self.c[3] * x + self.c[2]) * x + self.c[1]) * x + self.c[0];
    }

    #[inline]
    pub fn derivative(&self, x: f32) -> f32 {
        return (3.0 * self.c[3] * x + 2.0 * self.c[2]) * x + self.c[1];
    }

    #[inline]
    pub fn second_derivative(&self, x: f32) -> f32 {
        return 6.0 * self.c[3] * x + 2.0 * self.c[2];
    }

    #[inline]
    pub fn third_derivative(&self, _x: f32) -> f32 {
        return 6.0 * self.c[3];
    }

    /// Curve `g(x) = f(x + x_shift)`.
    pub fn shift_left(&mut self, x_shift: f32) {
        if x_shift == 0.0 {
            return;
        }
        // Taylor expansion about x_shift. c[3] is unchanged.
        let c0 = self.evaluate(x_shift);
        let c1 = self.derivative(x_shift);
        let c2 = 0.5 * self.second_derivative(x_shift);
        self.c[0] = c0;
        self.c[1] = c1;
        self.c[2] = c2;
    }

    /// Curve `g(x) = f(x - x_shift)`.
    #[inline]
    pub fn shift_right(&mut self, x_shift: f32) {
        self.shift_left(-x_shift);
    }

    #[inline]
    pub fn shift_up(&mut self, y_offset: f32) {
        self.c[0] += y_offset;
    }

    #[inline]
    pub fn scale_up(&mut self, y_scale: f32) {
        for c in self.c.iter_mut() {
            *c *= y_scale;
        }
    }

    /// Largest absolute coefficient.
    #[inline]
    pub fn max_coeff(&self) -> f32 {
        return self.c.iter().fold(0.0f32, |m, c| m.max(c.abs()));
    }

    #[inline]
    pub fn epsilon_in_interval(&self, max_x: f32) -> f32 {
        return max_x.abs().max(self.max_coeff()) * EPSILON_SCALE;
    }

    /// True if the second derivative never changes sign over `x_limits`.
    ///
    /// The second derivative is linear, so checking both ends is enough.
    /// Values within epsilon of zero are treated as zero and match any sign.
    pub fn uniform_curvature(&self, x_limits: &Interval) -> bool {
        let epsilon = self.epsilon_in_interval(x_limits.max);
        let start = clamp_near_zero(self.second_derivative(x_limits.min), epsilon);
        let end = clamp_near_zero(self.second_derivative(x_limits.max), epsilon);
        return start * end >= 0.0;
    }
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::*;

    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    #[wasm_bindgen_test]
    fn test_hermite_boundaries() {
        let init = CubicInit::new(1.0, -2.0, 3.0, 0.5, 2.0);
        let c = CubicCurve::from_init(&init);
        assert!((c.evaluate(0.0) - 1.0).abs() < EPSILON);
        assert!((c.derivative(0.0) + 2.0).abs() < EPSILON);
        assert!((c.evaluate(2.0) - 3.0).abs() < EPSILON);
        assert!((c.derivative(2.0) - 0.5).abs() < EPSILON);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_hermite_scenario() {
        let c = CubicCurve::from_init(&CubicInit::new(0.0, 1.0, 1.0, 0.0, 1.0));
        // y = x + x^2 - x^3
        assert!((c.evaluate(0.5) - 0.625).abs() < EPSILON);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_zero_width() {
        let c = CubicCurve::from_init(&CubicInit::new(4.0, 1.0, 9.0, 1.0, 0.0));
        assert_eq!(c.evaluate(0.0), 4.0);
        assert_eq!(c.evaluate(100.0), 4.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_shift_and_scale() {
        let base = CubicCurve::new(1.0, -2.0, 0.5, 3.0);
        let mut right = base;
        right.shift_right(0.75);
        for i in 0..8 {
            let x = i as f32 * 0.3;
            assert!((right.evaluate(x + 0.75) - base.evaluate(x)).abs() < 1e-4);
        }

        let mut up = base;
        up.scale_up(-2.0);
        up.shift_up(1.0);
        assert!((up.evaluate(1.5) - (base.evaluate(1.5) * -2.0 + 1.0)).abs() < 1e-4);
        assert!((up.derivative(1.5) - base.derivative(1.5) * -2.0).abs() < 1e-4);
        assert_eq!(up.third_derivative(0.0), -12.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_uniform_curvature() {
        let range = Interval::new(0.0, 1.0);
        // ease in/out s-curve changes curvature in the middle
        let s = CubicCurve::from_init(&CubicInit::new(0.0, 0.0, 1.0, 0.0, 1.0));
        assert!(!s.uniform_curvature(&range));
        // a straight line has no curvature at all
        let line = CubicCurve::from_init(&CubicInit::new(0.0, 1.0, 1.0, 1.0, 1.0));
        assert!(line.uniform_curvature(&range));
        let bowl = CubicCurve::new(0.0, 1.0, 0.0, 0.0);
        assert!(bowl.uniform_curvature(&range));
    }
}
