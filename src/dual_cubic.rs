//!
//! Splits an ill-behaved cubic segment into two well-behaved ones.
//!
//! A cubic whose second derivative changes sign over its domain tends to
//! overshoot. Given the boundary conditions of such a segment, we pick an
//! intermediate node so that each of the two cubics on either side has
//! uniform curvature (or is as close to it as possible).
//!

use crate::cubic_curve::CubicInit;
use crate::math::{clamp, lerp, Interval};
use crate::quadratic_curve::QuadraticCurve;

/// Slopes steeper than 2^4 saturate the mid point selection.
const MAX_STEEPNESS: f32 = 4.0;
const MIN_MID_PERCENT: f32 = 0.1;
const MAX_MID_PERCENT: f32 = 1.0 - MIN_MID_PERCENT;
/// Prevents division by zero on flat segments.
const MIN_Y_DIFF: f32 = 0.1;

const ZERO_TO_ONE: Interval = Interval::new(0.0, 1.0);

#[derive(Debug, Clone, Copy)]
struct ControlNode {
    x: f32,
    y: f32,
    derivative: f32,
    second_derivative: f32,
}

impl ControlNode {
    fn new(x: f32, y: f32, derivative: f32) -> ControlNode {
        return ControlNode {
            x,
            y,
            derivative,
            second_derivative: 0.0,
        };
    }
}

/// Node that splits `init` into two cubics. Returns `(x, y, derivative)`,
/// with x relative to the start of the segment.
pub fn dual_cubic_mid_node(init: &CubicInit) -> (f32, f32, f32) {
    // Work in a normalized x domain [0, 1].
    let mut start = ControlNode::new(0.0, init.start_y, init.start_derivative * init.width_x);
    let mut end = ControlNode::new(1.0, init.end_y, init.end_derivative * init.width_x);

    let (approx_mid_percent, start_percent, end_percent) = approximate_mid_percent(&start, &end);

    let start_extreme_second = extreme_second_derivative_for_start(&start, &end, approx_mid_percent);
    let end_extreme_second = extreme_second_derivative_for_end(&start, &end, approx_mid_percent);
    start.second_derivative = lerp(0.0, start_extreme_second, start_percent);
    end.second_derivative = lerp(0.0, end_extreme_second, end_percent);

    let mid_percent = calculate_mid_percent(&start, &end);
    let mid = calculate_mid_node(&start, &end, mid_percent);

    return (mid.x * init.width_x, mid.y, mid.derivative / init.width_x);
}

/// Quadratic in the mid percent `k` whose sign tells whether the start
/// cubic keeps the curvature sign of `start`.
fn valid_mid_range_spline_for_start(start: &ControlNode, end: &ControlNode) -> QuadraticCurve {
    let yd = end.y - start.y;
    let sd = end.derivative - start.derivative;
    let wd = end.second_derivative - start.second_derivative;
    let w0 = start.second_derivative;
    let w1 = end.second_derivative;
    let s0 = start.derivative;
    let s1 = end.derivative;

    let c2 = wd;
    let c1 = 4.0 * sd - w0 - 2.0 * w1;
    let c0 = 6.0 * yd - 2.0 * s0 - 4.0 * s1 + w1;
    return QuadraticCurve::new(c2, c1, c0);
}

fn valid_mid_range_spline_for_end(start: &ControlNode, end: &ControlNode) -> QuadraticCurve {
    let yd = end.y - start.y;
    let sd = end.derivative - start.derivative;
    let wd = end.second_derivative - start.second_derivative;
    let w1 = end.second_derivative;
    let s1 = end.derivative;

    let c2 = -wd;
    let c1 = -4.0 * sd + 3.0 * w1;
    let c0 = -6.0 * yd + 6.0 * s1 - 2.0 * w1;
    return QuadraticCurve::new(c2, c1, c0);
}

fn index_of_longest(ranges: &[Interval]) -> usize {
    let mut longest_length = -1.0;
    let mut longest_index = 0;
    for (i, range) in ranges.iter().enumerate() {
        if range.size() > longest_length {
            longest_length = range.size();
            longest_index = i;
        }
    }
    return longest_index;
}

fn index_of_shortest(ranges: &[Interval]) -> usize {
    let mut shortest_length = f32::INFINITY;
    let mut shortest_index = 0;
    for (i, range) in ranges.iter().enumerate() {
        if range.size() < shortest_length {
            shortest_length = range.size();
            shortest_index = i;
        }
    }
    return shortest_index;
}

/// Pairwise intersections of `a` and `b`. Pairs that don't overlap are
/// returned as the gap between them.
fn intersect_intervals(a: &[Interval], b: &[Interval]) -> (Vec<Interval>, Vec<Interval>) {
    let mut intersections = Vec::with_capacity(a.len() * b.len());
    let mut gaps = Vec::with_capacity(a.len() * b.len());
    for ra in a {
        for rb in b {
            let intersection = Interval::new(ra.min.max(rb.min), ra.max.min(rb.max));
            if intersection.size() > 0.0 {
                intersections.push(intersection);
            } else {
                gaps.push(Interval::new(intersection.max, intersection.min));
            }
        }
    }
    return (intersections, gaps);
}

/// Range of mid percents for which both cubics keep the curvature of
/// their outer node. If there is none, the smallest gap between the two
/// valid ranges.
fn calculate_valid_mid_range(start: &ControlNode, end: &ControlNode) -> Interval {
    let start_spline = valid_mid_range_spline_for_start(start, end);
    let end_spline = valid_mid_range_spline_for_end(start, end);

    let start_ranges = start_spline.intervals_matching_sign(&ZERO_TO_ONE, start.second_derivative);
    let end_ranges = end_spline.intervals_matching_sign(&ZERO_TO_ONE, end.second_derivative);

    let (intersections, gaps) = intersect_intervals(&start_ranges, &end_ranges);
    if !intersections.is_empty() {
        return intersections[index_of_longest(&intersections)];
    }
    if !gaps.is_empty() {
        return gaps[index_of_shortest(&gaps)];
    }
    return ZERO_TO_ONE;
}

fn calculate_mid_percent(start: &ControlNode, end: &ControlNode) -> f32 {
    let valid_range = calculate_valid_mid_range(start, end);
    // Prefer the middle, but stay inside the valid range.
    let mid_unclamped = clamp(0.5, valid_range.min, valid_range.max);
    return clamp(mid_unclamped, MIN_MID_PERCENT, MAX_MID_PERCENT);
}

fn calculate_mid_node(start: &ControlNode, end: &ControlNode, k: f32) -> ControlNode {
    let y_diff = end.y - start.y;
    let s_diff = end.derivative - start.derivative;
    let derivative_k = lerp(end.derivative, start.derivative, k);
    let y_k = lerp(start.y, end.y, k);
    let second_k = lerp(end.second_derivative, start.second_derivative, k);
    let j = 1.0 - k;
    let second_k_squared = k * k * start.second_derivative - j * j * end.second_derivative;

    let s = 3.0 * y_diff - 2.0 * derivative_k - 0.5 * second_k_squared;
    let y = y_k + k * j * (-2.0 / 3.0 * s_diff + 1.0 / 6.0 * second_k);
    let x = lerp(start.x, end.x, k);
    return ControlNode::new(x, y, s);
}

fn extreme_second_derivative_for_start(start: &ControlNode, end: &ControlNode, k: f32) -> f32 {
    let y_diff = end.y - start.y;
    let s_diff = end.derivative - start.derivative;
    return s_diff + (1.0 / k) * (3.0 * y_diff - 2.0 * start.derivative - end.derivative);
}

fn extreme_second_derivative_for_end(start: &ControlNode, end: &ControlNode, k: f32) -> f32 {
    let y_diff = end.y - start.y;
    let s_diff = end.derivative - start.derivative;
    return (1.0 / (k - 1.0)) * (s_diff * k + 3.0 * y_diff - 3.0 * end.derivative);
}

#[inline]
fn calculate_steepness(derivative: f32) -> f32 {
    let abs_derivative = derivative.abs();
    return if abs_derivative <= 1.0 { 0.0 } else { abs_derivative.log2() };
}

/// First guess at the mid percent, biased toward the steeper end.
/// Returns `(mid_percent, start_percent, end_percent)`, where the last two
/// say how much of the extreme second derivative each end receives.
fn approximate_mid_percent(start: &ControlNode, end: &ControlNode) -> (f32, f32, f32) {
    let abs_y_diff = (end.y - start.y).abs();
    let y_diff_recip = 1.0 / abs_y_diff.max(MIN_Y_DIFF);
    let start_steepness = calculate_steepness(start.derivative * y_diff_recip);
    let end_steepness = calculate_steepness(end.derivative * y_diff_recip);
    let diff_steepness = (start_steepness - end_steepness).abs();
    let percent_extreme = (diff_steepness / MAX_STEEPNESS).min(1.0);

    let start_is_steeper = start_steepness >= end_steepness;
    let extreme_percent = if start_is_steeper { MIN_MID_PERCENT } else { MAX_MID_PERCENT };
    let mid_percent = lerp(0.5, extreme_percent, percent_extreme);

    let start_percent = if start_is_steeper { percent_extreme } else { 1.0 - percent_extreme };
    let end_percent = if start_is_steeper { 1.0 - percent_extreme } else { percent_extreme };
    return (mid_percent, start_percent, end_percent);
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::*;

    use super::*;
    use crate::cubic_curve::CubicCurve;

    #[test]
    #[wasm_bindgen_test]
    fn test_mid_node_inside_segment() {
        let init = CubicInit::new(0.0, 1.0, 1.0, 0.0, 1.0);
        let (x, y, d) = dual_cubic_mid_node(&init);
        assert!((0.1..=0.9).contains(&x));
        assert!(y.is_finite() && d.is_finite());
        assert!((x - 0.9).abs() < 1e-4);
        assert!((y - 0.9525).abs() < 1e-3);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_mid_node_scales_with_width() {
        let narrow = CubicInit::new(0.0, 1.0, 1.0, 0.0, 1.0);
        let wide = CubicInit::new(0.0, 0.01, 1.0, 0.0, 100.0);
        let (nx, ny, nd) = dual_cubic_mid_node(&narrow);
        let (wx, wy, wd) = dual_cubic_mid_node(&wide);
        assert!((wx - nx * 100.0).abs() < 1e-2);
        assert!((wy - ny).abs() < 1e-4);
        assert!((wd - nd / 100.0).abs() < 1e-5);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_split_segment() {
        let init = CubicInit::new(0.0, 1.0, 1.0, 0.0, 1.0);
        assert!(!CubicCurve::from_init(&init).uniform_curvature(&ZERO_TO_ONE));

        let (x, y, d) = dual_cubic_mid_node(&init);
        let left = CubicCurve::from_init(&CubicInit::new(0.0, 1.0, y, d, x));
        let right = CubicCurve::from_init(&CubicInit::new(y, d, 1.0, 0.0, 1.0 - x));
        assert!((left.evaluate(0.5) - 0.5).abs() < 0.05);
        assert!((left.evaluate(x) - y).abs() < 1e-4);
        assert!((right.evaluate(1.0 - x) - 1.0).abs() < 1e-4);
    }
}
