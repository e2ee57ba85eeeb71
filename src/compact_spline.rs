//!
//! Compact, quantized spline representation.
//!
//! A `CompactSpline` is a sequence of nodes `(x, y, derivative)`. The curve
//! between two consecutive nodes is the cubic that matches both nodes' y
//! and derivative. Nodes are stored as 16-bit fixed point values:
//! * x is an integer multiple of `x_granularity`,
//! * y is a fraction of `y_range`,
//! * the derivative is stored as an angle, so steep slopes stay
//!   representable.
//!

use static_assertions::assert_eq_size;
use std::rc::Rc;

use crate::bulk_spline_evaluator::{BulkSplineEvaluator, SplinePlayback};
use crate::cubic_curve::{CubicCurve, CubicInit};
use crate::dual_cubic::dual_cubic_mid_node;
use crate::math::{clamp, lerp, Interval};

/// Index of a node, or of the segment that starts at that node.
pub type CompactSplineIndex = u16;

/// Index is not valid.
pub const INVALID_SPLINE_INDEX: CompactSplineIndex = 0xFFFF;
/// x is before the start of the spline.
pub const BEFORE_SPLINE_INDEX: CompactSplineIndex = 0xFFFE;
/// x is after the end of the spline.
pub const AFTER_SPLINE_INDEX: CompactSplineIndex = 0xFFFD;

/// True for `BEFORE_SPLINE_INDEX`, `AFTER_SPLINE_INDEX` and `INVALID_SPLINE_INDEX`.
#[inline]
pub fn outside_spline(index: CompactSplineIndex) -> bool {
    return index >= AFTER_SPLINE_INDEX;
}

const MAX_X: u16 = u16::MAX;
const MAX_Y: u16 = u16::MAX;
const Y_SCALE: f32 = 1.0 / MAX_Y as f32;
const ANGLE_SCALE: f32 = -std::f32::consts::PI / i16::MIN as f32;

/// Room for a two node spline plus the intermediate nodes smoothing may add.
pub const DEFAULT_MAX_NODES: u16 = 7;

/// Y-range buffer used when resampling one spline into another.
const RESAMPLE_Y_RANGE_BUFFER: f32 = 1.05;

/// One quantized node.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "rkyv", derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize))]
#[cfg_attr(feature = "rkyv", archive(check_bytes))]
pub struct CompactSplineNode {
    x: u16,
    y: u16,
    angle: i16,
}

assert_eq_size!(CompactSplineNode, [u16; 3]);

impl CompactSplineNode {
    /// Creates a node from its raw, quantized parts.
    #[inline]
    pub fn from_raw(x: u16, y: u16, angle: i16) -> CompactSplineNode {
        return CompactSplineNode { x, y, angle };
    }

    /// Quantizes `(x, y, derivative)`. Values outside the representable
    /// range are clamped.
    pub fn new(x: f32, y: f32, derivative: f32, x_granularity: f32, y_range: &Interval) -> CompactSplineNode {
        return CompactSplineNode {
            x: Self::compact_x(x, x_granularity),
            y: Self::compact_y(y, y_range),
            angle: Self::compact_derivative(derivative),
        };
    }

    #[inline]
    pub fn raw_x(&self) -> u16 {
        return self.x;
    }

    #[inline]
    pub fn raw_y(&self) -> u16 {
        return self.y;
    }

    #[inline]
    pub fn raw_angle(&self) -> i16 {
        return self.angle;
    }

    #[inline]
    pub fn x(&self, x_granularity: f32) -> f32 {
        return self.x as f32 * x_granularity;
    }

    #[inline]
    pub fn y(&self, y_range: &Interval) -> f32 {
        return lerp(y_range.min, y_range.max, self.y as f32 * Y_SCALE);
    }

    #[inline]
    pub fn derivative(&self) -> f32 {
        return (self.angle as f32 * ANGLE_SCALE).tan();
    }

    /// Rounds `x` to the nearest grain. May be negative or beyond `u16`.
    #[inline]
    pub fn quantize_x(x: f32, x_granularity: f32) -> i32 {
        return (x / x_granularity + 0.5) as i32;
    }

    #[inline]
    fn compact_x(x: f32, x_granularity: f32) -> u16 {
        return Self::quantize_x(x, x_granularity).clamp(0, MAX_X as i32) as u16;
    }

    fn compact_y(y: f32, y_range: &Interval) -> u16 {
        let length = y_range.size();
        if length == 0.0 {
            return 0;
        }
        let percent = clamp((y - y_range.min) / length, 0.0, 1.0);
        return (MAX_Y as f32 * percent) as u16;
    }

    #[inline]
    fn compact_derivative(derivative: f32) -> i16 {
        return (derivative.atan() / ANGLE_SCALE) as i16;
    }
}

/// Node in real, uncompressed units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UncompressedNode {
    pub x: f32,
    pub y: f32,
    pub derivative: f32,
}

impl UncompressedNode {
    #[inline]
    pub const fn new(x: f32, y: f32, derivative: f32) -> UncompressedNode {
        return UncompressedNode { x, y, derivative };
    }
}

/// How `CompactSpline::add_node` treats the segment it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplineAddMethod {
    /// Add the node verbatim.
    AddWithoutModification,
    /// If the new segment would change curvature, first add an intermediate
    /// node so that both halves are well behaved.
    #[default]
    EnsureCubicWellBehaved,
}

///
/// A bounded, append-only list of quantized nodes.
///
/// Node x values never decrease; at most two nodes may share an x, which
/// represents a discontinuity.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "rkyv", derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize))]
#[cfg_attr(feature = "rkyv", archive(check_bytes))]
pub struct CompactSpline {
    y_range: Interval,
    x_granularity: f32,
    nodes: Vec<CompactSplineNode>,
    max_nodes: u16,
}

impl Default for CompactSpline {
    fn default() -> CompactSpline {
        return CompactSpline::new(DEFAULT_MAX_NODES);
    }
}

impl CompactSpline {
    /// Creates an empty spline with room for `max_nodes` nodes.
    pub fn new(max_nodes: u16) -> CompactSpline {
        return CompactSpline {
            y_range: Interval::default(),
            x_granularity: 1.0,
            nodes: Vec::with_capacity(max_nodes as usize),
            max_nodes,
        };
    }

    /// Creates an empty spline with the given quantization.
    pub fn with_range(y_range: Interval, x_granularity: f32, max_nodes: u16) -> CompactSpline {
        let mut spline = CompactSpline::new(max_nodes);
        spline.init(y_range, x_granularity);
        return spline;
    }

    /// Creates a spline holding exactly `nodes`, quantized to fit.
    pub fn from_nodes(nodes: &[UncompressedNode]) -> CompactSpline {
        let mut spline = CompactSpline::new(nodes.len().min(u16::MAX as usize) as u16);
        spline.init_from_nodes(nodes);
        return spline;
    }

    /// Creates a spline that samples `source` uniformly with `max_nodes` nodes.
    pub fn from_spline(source: &CompactSpline, max_nodes: u16) -> CompactSpline {
        let mut spline = CompactSpline::new(max_nodes);
        spline.init_from_spline(source);
        return spline;
    }

    /// Reconstructs a spline from already quantized parts.
    /// Nodes beyond `max_nodes`, and nodes that would step back in x, are dropped.
    /// Of three or more nodes at one x, only the first and last are kept.
    pub fn from_raw(y_range: Interval, x_granularity: f32, nodes: &[CompactSplineNode], max_nodes: u16) -> CompactSpline {
        let mut spline = CompactSpline::with_range(y_range, x_granularity, max_nodes);
        for node in nodes {
            spline.add_node_verbatim(*node);
        }
        return spline;
    }

    /// Resets to an empty spline with the given quantization.
    pub fn init(&mut self, y_range: Interval, x_granularity: f32) {
        self.y_range = y_range;
        self.x_granularity = if x_granularity > 0.0 { x_granularity } else { 1.0 };
        self.nodes.clear();
    }

    /// Resets to hold `nodes` verbatim. The y-range and x-granularity are
    /// chosen to fit.
    pub fn init_from_nodes(&mut self, nodes: &[UncompressedNode]) {
        let end_x = nodes.last().map_or(0.0, |n| n.x);
        let x_granularity = Self::recommend_x_granularity(end_x);
        let y_range = nodes.iter().fold(Interval::empty(), |r, n| r.included(n.y));
        let y_range = if y_range.size() < 0.0 { Interval::default() } else { y_range };
        self.init(y_range, x_granularity);
        self.add_uncompressed_nodes(nodes);
    }

    /// Resets to a uniform sampling of `source`, using all of `max_nodes`.
    pub fn init_from_spline(&mut self, source: &CompactSpline) {
        self.init(source.y_range.scaled(RESAMPLE_Y_RANGE_BUFFER), source.x_granularity);
        if self.max_nodes < 2 || source.num_nodes() == 0 {
            return;
        }

        let delta_x = source.length_x() / (self.max_nodes - 1) as f32;
        let mut evaluator = BulkSplineEvaluator::new();
        evaluator.set_num_indices(1);
        let playback = SplinePlayback {
            start_x: source.start_x(),
            ..SplinePlayback::default()
        };
        evaluator.set_splines(0, &[Rc::new(source.clone())], &playback);
        for _ in 0..self.max_nodes {
            self.add_node(
                evaluator.x(0),
                evaluator.y(0),
                evaluator.derivative(0),
                SplineAddMethod::AddWithoutModification,
            );
            evaluator.advance_frame(delta_x);
        }
    }

    /// Appends a node.
    ///
    /// * A node with x before the last node's x is ignored.
    /// * A node identical to the last node is ignored.
    /// * A node with the same x as the last node creates a discontinuity.
    ///   If the spline already ends in a discontinuity, the middle node is
    ///   replaced.
    /// * With `EnsureCubicWellBehaved`, an intermediate node may be added
    ///   first so that the curve doesn't overshoot.
    pub fn add_node(&mut self, x: f32, y: f32, derivative: f32, method: SplineAddMethod) {
        let new_node = CompactSplineNode::new(x, y, derivative, self.x_granularity, &self.y_range);

        let Some(back) = self.nodes.last().copied() else {
            self.add_node_verbatim(new_node);
            return;
        };
        if new_node.x < back.x || new_node == back {
            return;
        }

        let discontinuity = back.x == new_node.x;
        if !discontinuity
            && method == SplineAddMethod::EnsureCubicWellBehaved
            && self.nodes.len() + 2 <= self.max_nodes as usize
        {
            let init = self.node_cubic_init(&back, &new_node);
            let curve = CubicCurve::from_init(&init);
            if !curve.uniform_curvature(&Interval::new(0.0, init.width_x)) {
                let (mid_x, mid_y, mid_derivative) = dual_cubic_mid_node(&init);
                let mid_node = CompactSplineNode::new(
                    back.x(self.x_granularity) + mid_x,
                    mid_y,
                    mid_derivative,
                    self.x_granularity,
                    &self.y_range,
                );
                if mid_node.x != back.x && mid_node.x != new_node.x {
                    self.add_node_verbatim(mid_node);
                }
            }
        }

        self.add_node_verbatim(new_node);
    }

    /// Appends each node without modification.
    pub fn add_uncompressed_nodes(&mut self, nodes: &[UncompressedNode]) {
        for node in nodes {
            self.add_node(node.x, node.y, node.derivative, SplineAddMethod::AddWithoutModification);
        }
    }

    fn add_node_verbatim(&mut self, node: CompactSplineNode) {
        if let Some(back) = self.nodes.last() {
            if node.x < back.x {
                return;
            }
            // At most two nodes share an x. A third replaces the middle one.
            let len = self.nodes.len();
            if node.x == back.x && len >= 2 && self.nodes[len - 2].x == back.x {
                self.nodes.pop();
            }
        }
        if self.nodes.len() >= self.max_nodes as usize {
            log::warn!("CompactSpline full ({} nodes), node dropped", self.max_nodes);
            return;
        }
        self.nodes.push(node);
    }

    /// Recommended granularity for a spline whose x spans `[0, max_x]`.
    #[inline]
    pub fn recommend_x_granularity(max_x: f32) -> f32 {
        return if max_x <= 0.0 { 1.0 } else { max_x / MAX_X as f32 };
    }
}

impl CompactSpline {
    #[inline]
    pub fn num_nodes(&self) -> u16 {
        return self.nodes.len() as u16;
    }

    #[inline]
    pub fn max_nodes(&self) -> u16 {
        return self.max_nodes;
    }

    #[inline]
    pub fn nodes(&self) -> &[CompactSplineNode] {
        return &self.nodes;
    }

    #[inline]
    pub fn y_range(&self) -> &Interval {
        return &self.y_range;
    }

    #[inline]
    pub fn x_granularity(&self) -> f32 {
        return self.x_granularity;
    }

    /// Index of the last node. Zero for an empty spline.
    #[inline]
    pub fn last_node_index(&self) -> CompactSplineIndex {
        return self.num_nodes().saturating_sub(1);
    }

    /// Index of the last segment. Zero if there are fewer than two nodes.
    #[inline]
    pub fn last_segment_index(&self) -> CompactSplineIndex {
        return self.num_nodes().saturating_sub(2);
    }

    #[inline]
    pub fn start_x(&self) -> f32 {
        return self.nodes.first().map_or(0.0, |n| n.x(self.x_granularity));
    }

    #[inline]
    pub fn start_y(&self) -> f32 {
        return self.nodes.first().map_or(0.0, |n| n.y(&self.y_range));
    }

    #[inline]
    pub fn start_derivative(&self) -> f32 {
        return self.nodes.first().map_or(0.0, |n| n.derivative());
    }

    #[inline]
    pub fn end_x(&self) -> f32 {
        return self.nodes.last().map_or(0.0, |n| n.x(self.x_granularity));
    }

    #[inline]
    pub fn end_y(&self) -> f32 {
        return self.nodes.last().map_or(0.0, |n| n.y(&self.y_range));
    }

    #[inline]
    pub fn end_derivative(&self) -> f32 {
        return self.nodes.last().map_or(0.0, |n| n.derivative());
    }

    #[inline]
    pub fn length_x(&self) -> f32 {
        return self.end_x() - self.start_x();
    }

    #[inline]
    pub fn interval_x(&self) -> Interval {
        return Interval::new(self.start_x(), self.end_x());
    }

    #[inline]
    pub fn interval_y(&self) -> &Interval {
        return &self.y_range;
    }

    /// x of node `index`. Before the spline is 0, after it is `end_x()`.
    pub fn node_x(&self, index: CompactSplineIndex) -> f32 {
        match index {
            AFTER_SPLINE_INDEX => self.end_x(),
            BEFORE_SPLINE_INDEX => 0.0,
            _ => self.nodes.get(index as usize).map_or(self.end_x(), |n| n.x(self.x_granularity)),
        }
    }

    /// y of node `index`. Before the spline is `start_y()`, after it is `end_y()`.
    pub fn node_y(&self, index: CompactSplineIndex) -> f32 {
        match index {
            AFTER_SPLINE_INDEX => self.end_y(),
            BEFORE_SPLINE_INDEX => self.start_y(),
            _ => self.nodes.get(index as usize).map_or(self.end_y(), |n| n.y(&self.y_range)),
        }
    }

    pub fn node_derivative(&self, index: CompactSplineIndex) -> f32 {
        return self.nodes.get(index as usize).map_or(0.0, |n| n.derivative());
    }

    /// x-extent of the segment at `index`.
    pub fn interval_x_at(&self, index: CompactSplineIndex) -> Interval {
        if index == BEFORE_SPLINE_INDEX {
            return Interval::new(0.0, self.start_x());
        }
        let i = index as usize;
        if outside_spline(index) || i + 1 >= self.nodes.len() {
            return Interval::new(self.end_x(), f32::INFINITY);
        }
        return Interval::new(self.nodes[i].x(self.x_granularity), self.nodes[i + 1].x(self.x_granularity));
    }

    /// Segment that contains `x`, or `BEFORE_SPLINE_INDEX`/`AFTER_SPLINE_INDEX`.
    ///
    /// `guess_index` is checked first, a binary search follows if it's wrong.
    /// x exactly at the end of the spline belongs to the last segment.
    pub fn index_for_x(&self, x: f32, guess_index: CompactSplineIndex) -> CompactSplineIndex {
        let (Some(front), Some(back)) = (self.nodes.first(), self.nodes.last()) else {
            return AFTER_SPLINE_INDEX;
        };

        let quantized_x = CompactSplineNode::quantize_x(x, self.x_granularity);
        if quantized_x < front.x as i32 {
            return BEFORE_SPLINE_INDEX;
        }
        if quantized_x == back.x as i32 && self.nodes.len() >= 2 {
            return self.last_segment_index();
        }
        if quantized_x >= back.x as i32 {
            return AFTER_SPLINE_INDEX;
        }

        let compact_x = quantized_x as u16;
        if self.index_contains_x(compact_x, guess_index) {
            let guess = guess_index as usize;
            if self.nodes[guess + 1].x > self.nodes[guess].x {
                return guess_index;
            }
        }
        return self.binary_search_index_for_x(compact_x);
    }

    /// As `index_for_x`, but wraps x back into `[0, end_x()]` when `repeat`
    /// is set and x is past the end. Returns the index and the wrapped x.
    pub fn index_for_x_allowing_repeat(
        &self,
        x: f32,
        guess_index: CompactSplineIndex,
        repeat: bool,
    ) -> (CompactSplineIndex, f32) {
        let index = self.index_for_x(x, guess_index);
        if !repeat || index != AFTER_SPLINE_INDEX {
            return (index, x);
        }

        let x_range = Interval::new(0.0, self.end_x());
        let repeat_x = x_range.normalize_close_value(x);
        return (self.index_for_x(repeat_x, 0), repeat_x);
    }

    /// Clamps out-of-spline indices onto the first or last node.
    /// Returns the clamped index and the x to use with it.
    pub fn clamp_index(&self, index: CompactSplineIndex, x: f32) -> (CompactSplineIndex, f32) {
        match index {
            BEFORE_SPLINE_INDEX => (0, self.start_x()),
            AFTER_SPLINE_INDEX => (self.last_node_index(), self.end_x()),
            _ => (index, x),
        }
    }

    #[inline]
    fn index_contains_x(&self, compact_x: u16, index: CompactSplineIndex) -> bool {
        let i = index as usize;
        return i + 1 < self.nodes.len() && self.nodes[i].x <= compact_x && compact_x <= self.nodes[i + 1].x;
    }

    fn binary_search_index_for_x(&self, compact_x: u16) -> CompactSplineIndex {
        // First node with x strictly greater than compact_x.
        let upper = self.nodes.partition_point(|n| n.x <= compact_x);
        return upper.saturating_sub(1) as CompactSplineIndex;
    }

    /// Boundary conditions of the segment at `index`. Outside the spline,
    /// a flat curve at the nearest end.
    pub fn create_cubic_init(&self, index: CompactSplineIndex) -> CubicInit {
        let i = index as usize;
        if outside_spline(index) || i + 1 >= self.nodes.len() {
            let y = if index == BEFORE_SPLINE_INDEX { self.start_y() } else { self.end_y() };
            return CubicInit::new(y, 0.0, y, 0.0, 1.0);
        }
        return self.node_cubic_init(&self.nodes[i], &self.nodes[i + 1]);
    }

    fn node_cubic_init(&self, s: &CompactSplineNode, e: &CompactSplineNode) -> CubicInit {
        return CubicInit::new(
            s.y(&self.y_range),
            s.derivative(),
            e.y(&self.y_range),
            e.derivative(),
            (e.x as f32 - s.x as f32) * self.x_granularity,
        );
    }

    /// Evaluates the spline at `x` from scratch.
    /// To sample many values, prefer `ys()` or a `BulkSplineEvaluator`.
    pub fn y_calculated_slowly(&self, x: f32) -> f32 {
        let index = self.index_for_x(x, 0);
        match index {
            BEFORE_SPLINE_INDEX => self.start_y(),
            AFTER_SPLINE_INDEX => self.end_y(),
            _ => {
                let cubic = CubicCurve::from_init(&self.create_cubic_init(index));
                cubic.evaluate(x - self.node_x(index))
            }
        }
    }

    /// Samples `num_points` evenly spaced y values and derivatives,
    /// starting at `start_x`.
    pub fn ys(&self, start_x: f32, delta_x: f32, num_points: usize) -> (Vec<f32>, Vec<f32>) {
        return Self::bulk_ys(&[Rc::new(self.clone())], start_x, delta_x, num_points);
    }

    /// Samples several splines in lockstep. Output is point-major:
    /// entry `i * splines.len() + j` is point `i` of spline `j`.
    pub fn bulk_ys(
        splines: &[Rc<CompactSpline>],
        start_x: f32,
        delta_x: f32,
        num_points: usize,
    ) -> (Vec<f32>, Vec<f32>) {
        let num_splines = splines.len();
        let mut ys = Vec::with_capacity(num_points * num_splines);
        let mut derivatives = Vec::with_capacity(num_points * num_splines);

        let mut evaluator = BulkSplineEvaluator::new();
        evaluator.set_num_indices(num_splines);
        let playback = SplinePlayback {
            start_x,
            ..SplinePlayback::default()
        };
        evaluator.set_splines(0, splines, &playback);
        for _ in 0..num_points {
            ys.extend_from_slice(evaluator.ys(0, num_splines));
            derivatives.extend((0..num_splines).map(|j| evaluator.derivative(j)));
            evaluator.advance_frame(delta_x);
        }
        return (ys, derivatives);
    }
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::*;

    use super::*;

    const EPSILON_X: f32 = 0.0001;
    const EPSILON_Y: f32 = 0.0001;
    const EPSILON_DERIVATIVE: f32 = 0.01;
    // Never a valid guess, forces the binary search.
    const RIDICULOUS_INDEX: CompactSplineIndex = 10000;

    const UNCOMPRESSED: [UncompressedNode; 4] = [
        UncompressedNode::new(0.0, 0.0, 0.0),
        UncompressedNode::new(1.0, 0.5, 0.03),
        UncompressedNode::new(1.5, 0.6, 0.02),
        UncompressedNode::new(3.0, 0.0, -0.04),
    ];

    const UNIFORM: [UncompressedNode; 6] = [
        UncompressedNode::new(0.0, 0.0, 0.0),
        UncompressedNode::new(1.0, 0.5, 0.03),
        UncompressedNode::new(2.0, 0.6, 0.02),
        UncompressedNode::new(3.0, 0.0, -0.04),
        UncompressedNode::new(4.0, 0.03, -0.02),
        UncompressedNode::new(5.0, 0.9, -0.1),
    ];

    fn fixture() -> CompactSpline {
        let mut spline = CompactSpline::with_range(Interval::new(0.0, 1.0), 0.01, DEFAULT_MAX_NODES);
        spline.add_node(0.0, 0.1, 0.0, SplineAddMethod::AddWithoutModification);
        spline.add_node(1.0, 0.4, 0.0, SplineAddMethod::AddWithoutModification);
        spline.add_node(4.0, 0.2, 0.0, SplineAddMethod::AddWithoutModification);
        spline.add_node(40.0, 0.2, 0.0, SplineAddMethod::AddWithoutModification);
        spline.add_node(100.0, 1.0, 0.0, SplineAddMethod::AddWithoutModification);
        return spline;
    }

    fn check_nodes(spline: &CompactSpline, nodes: &[UncompressedNode]) {
        for (i, n) in nodes.iter().enumerate() {
            let i = i as CompactSplineIndex;
            assert!((spline.node_x(i) - n.x).abs() < EPSILON_X, "x {}", i);
            assert!((spline.node_y(i) - n.y).abs() < EPSILON_Y, "y {}", i);
            assert!((spline.node_derivative(i) - n.derivative).abs() < EPSILON_DERIVATIVE, "d {}", i);
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_index_for_x_outside() {
        let spline = fixture();
        assert_eq!(spline.index_for_x(-1.0, RIDICULOUS_INDEX), BEFORE_SPLINE_INDEX);
        assert_eq!(spline.index_for_x(-0.0001, RIDICULOUS_INDEX), 0);
        assert_eq!(spline.index_for_x(-0.011, RIDICULOUS_INDEX), 0);
        assert_eq!(spline.index_for_x(101.0, RIDICULOUS_INDEX), AFTER_SPLINE_INDEX);
        assert_eq!(spline.index_for_x(100.0001, RIDICULOUS_INDEX), spline.last_segment_index());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_index_for_x_inside() {
        let spline = fixture();
        assert_eq!(spline.index_for_x(0.0, RIDICULOUS_INDEX), 0);
        assert_eq!(spline.index_for_x(100.0, RIDICULOUS_INDEX), spline.last_segment_index());
        assert_eq!(spline.index_for_x(99.9999, RIDICULOUS_INDEX), spline.last_segment_index());
        assert_eq!(spline.index_for_x(99.99, RIDICULOUS_INDEX), 3);
        assert_eq!(spline.index_for_x(1.0, RIDICULOUS_INDEX), 1);
        assert_eq!(spline.index_for_x(1.1, RIDICULOUS_INDEX), 1);
        assert_eq!(spline.index_for_x(4.1, RIDICULOUS_INDEX), 2);
        // a correct guess, and a wrong one
        assert_eq!(spline.index_for_x(4.1, 2), 2);
        assert_eq!(spline.index_for_x(4.1, 0), 2);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_index_for_x_allowing_repeat() {
        let spline = fixture();
        let (index, x) = spline.index_for_x_allowing_repeat(150.0, 0, true);
        assert_eq!(index, 3);
        assert!((x - 50.0).abs() < EPSILON_X);
        let (index, x) = spline.index_for_x_allowing_repeat(150.0, 0, false);
        assert_eq!(index, AFTER_SPLINE_INDEX);
        assert_eq!(x, 150.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_out_of_spline_values() {
        let spline = fixture();
        assert_eq!(spline.node_x(BEFORE_SPLINE_INDEX), 0.0);
        assert_eq!(spline.node_x(AFTER_SPLINE_INDEX), spline.end_x());
        assert_eq!(spline.node_y(BEFORE_SPLINE_INDEX), spline.start_y());
        assert_eq!(spline.node_y(AFTER_SPLINE_INDEX), spline.end_y());
        assert_eq!(spline.interval_x_at(AFTER_SPLINE_INDEX).max, f32::INFINITY);
        assert_eq!(spline.clamp_index(AFTER_SPLINE_INDEX, 500.0), (4, spline.end_x()));
        assert_eq!(spline.clamp_index(2, 5.0), (2, 5.0));

        let flat = spline.create_cubic_init(BEFORE_SPLINE_INDEX);
        assert_eq!(flat.start_y, flat.end_y);
        assert_eq!(flat.start_derivative, 0.0);
        assert_eq!(flat.width_x, 1.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_empty_spline() {
        let spline = CompactSpline::default();
        assert_eq!(spline.index_for_x(3.0, 0), AFTER_SPLINE_INDEX);
        assert_eq!(spline.y_calculated_slowly(3.0), 0.0);
        assert_eq!(spline.end_x(), 0.0);
        assert!(spline.y_calculated_slowly(-1.0).is_finite());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_y_slow_at_nodes() {
        let spline = fixture();
        for i in 0..spline.num_nodes() {
            let y = spline.y_calculated_slowly(spline.node_x(i));
            assert!((spline.node_y(i) - y).abs() < EPSILON_Y);
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_add_node_tolerates_bad_input() {
        let mut spline = CompactSpline::with_range(Interval::new(0.0, 1.0), 0.1, 8);
        spline.add_node(1.0, 0.5, 0.0, SplineAddMethod::AddWithoutModification);
        spline.add_node(0.5, 0.5, 0.0, SplineAddMethod::AddWithoutModification);
        assert_eq!(spline.num_nodes(), 1);
        spline.add_node(1.0, 0.5, 0.0, SplineAddMethod::AddWithoutModification);
        assert_eq!(spline.num_nodes(), 1);

        // discontinuity, then a third node at the same x replaces the middle one
        spline.add_node(1.0, 0.9, 0.0, SplineAddMethod::AddWithoutModification);
        assert_eq!(spline.num_nodes(), 2);
        spline.add_node(1.0, 0.1, 0.0, SplineAddMethod::AddWithoutModification);
        assert_eq!(spline.num_nodes(), 2);
        assert!((spline.end_y() - 0.1).abs() < EPSILON_Y);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_from_raw_collapses_repeated_x() {
        let nodes = [
            CompactSplineNode::from_raw(0, 0, 0),
            CompactSplineNode::from_raw(10, 100, 0),
            CompactSplineNode::from_raw(10, 200, 0),
            CompactSplineNode::from_raw(10, 300, 0),
            CompactSplineNode::from_raw(20, 400, 0),
        ];
        let spline = CompactSpline::from_raw(Interval::new(0.0, 1.0), 1.0, &nodes, 8);
        let raw: Vec<(u16, u16)> = spline.nodes().iter().map(|n| (n.raw_x(), n.raw_y())).collect();
        assert_eq!(raw, vec![(0, 0), (10, 100), (10, 300), (20, 400)]);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_add_node_capacity() {
        let mut spline = CompactSpline::with_range(Interval::new(0.0, 1.0), 1.0, 3);
        for i in 0..5 {
            spline.add_node(i as f32, 0.5, 0.0, SplineAddMethod::AddWithoutModification);
        }
        assert_eq!(spline.num_nodes(), 3);
        assert_eq!(spline.max_nodes(), 3);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_add_node_well_behaved() {
        let mut spline = CompactSpline::with_range(Interval::new(0.0, 1.0), 0.01, DEFAULT_MAX_NODES);
        spline.add_node(0.0, 0.0, 1.0, SplineAddMethod::EnsureCubicWellBehaved);
        spline.add_node(1.0, 1.0, 0.0, SplineAddMethod::EnsureCubicWellBehaved);
        assert_eq!(spline.num_nodes(), 3);
        assert!((spline.node_x(1) - 0.9).abs() < 0.01);
        assert!((spline.end_y() - 1.0).abs() < EPSILON_Y);

        let mut plain = CompactSpline::with_range(Interval::new(0.0, 1.0), 0.01, DEFAULT_MAX_NODES);
        plain.add_node(0.0, 0.0, 1.0, SplineAddMethod::AddWithoutModification);
        plain.add_node(1.0, 1.0, 0.0, SplineAddMethod::AddWithoutModification);
        assert_eq!(plain.num_nodes(), 2);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_quantization() {
        let range = Interval::new(-2.0, 2.0);
        let node = CompactSplineNode::new(3.3, 0.25, -4.0, 0.1, &range);
        assert_eq!(node.raw_x(), 33);
        assert!((node.y(&range) - 0.25).abs() < 4.0 / 65535.0);
        assert!((node.derivative() + 4.0).abs() < 0.01);

        // out of range values clamp instead of wrapping
        let clamped = CompactSplineNode::new(-5.0, 9.0, f32::INFINITY, 0.1, &range);
        assert_eq!(clamped.raw_x(), 0);
        assert_eq!(clamped.raw_y(), u16::MAX);
        assert!(clamped.derivative().abs() > 1.0e4);

        let flat = CompactSplineNode::new(0.0, 7.0, 0.0, 1.0, &Interval::new(7.0, 7.0));
        assert_eq!(flat.y(&Interval::new(7.0, 7.0)), 7.0);
        assert_eq!(CompactSpline::recommend_x_granularity(0.0), 1.0);
        assert_eq!(CompactSpline::recommend_x_granularity(65535.0), 1.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_init_from_nodes() {
        let spline = CompactSpline::from_nodes(&UNCOMPRESSED);
        assert_eq!(spline.num_nodes(), 4);
        check_nodes(&spline, &UNCOMPRESSED);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_init_from_spline() {
        let uniform = CompactSpline::from_nodes(&UNIFORM);
        let spline = CompactSpline::from_spline(&uniform, UNIFORM.len() as u16);
        assert_eq!(spline.num_nodes(), UNIFORM.len() as u16);
        check_nodes(&spline, &UNIFORM);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_ys_start_and_end() {
        let spline = fixture();
        for num in 2..5usize {
            let delta_x = spline.end_x() / (num - 1) as f32;
            let (ys, ds) = spline.ys(0.0, delta_x, num);
            assert_eq!(ys.len(), num);
            assert!((ys[0] - spline.start_y()).abs() < EPSILON_Y);
            assert!((ys[num - 1] - spline.end_y()).abs() < EPSILON_Y);
            assert!((ds[0] - spline.start_derivative()).abs() < EPSILON_DERIVATIVE);
            assert!((ds[num - 1] - spline.end_derivative()).abs() < EPSILON_DERIVATIVE);
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_bulk_ys_vs_slow_ys() {
        let spline = fixture();
        const EXTRA_SAMPLES: usize = 6;
        for num in 2..15usize {
            let delta_x = spline.end_x() / (num - 1) as f32;
            let start_x = -((EXTRA_SAMPLES / 2) as f32) * delta_x;
            let (ys, _) = spline.ys(start_x, delta_x, num + EXTRA_SAMPLES);
            let mut x = start_x;
            for y in ys {
                assert!((y - spline.y_calculated_slowly(x)).abs() < EPSILON_Y, "x {}", x);
                x += delta_x;
            }
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_bulk_ys_many_splines() {
        let spline = Rc::new(fixture());
        let splines = [spline.clone(), spline.clone(), spline];
        let (ys, _) = CompactSpline::bulk_ys(&splines, 0.0, 100.0 / 15.0, 16);
        assert_eq!(ys.len(), 48);
        for point in ys.chunks(3) {
            assert_eq!(point[0], point[1]);
            assert_eq!(point[1], point[2]);
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    #[wasm_bindgen_test]
    fn test_serde() {
        let spline = fixture();
        let json = serde_json::to_string(&spline).unwrap();
        let back: CompactSpline = serde_json::from_str(&json).unwrap();
        assert_eq!(spline, back);
    }

    #[cfg(feature = "rkyv")]
    #[test]
    #[wasm_bindgen_test]
    fn test_rkyv() {
        use rkyv::ser::Serializer;
        use rkyv::Deserialize;

        let spline = fixture();
        let mut serializer = rkyv::ser::serializers::AllocSerializer::<256>::default();
        serializer.serialize_value(&spline).unwrap();
        let buf = serializer.into_serializer().into_inner();
        let archived = rkyv::check_archived_root::<CompactSpline>(&buf).unwrap();
        let mut deserializer = rkyv::Infallible;
        let back: CompactSpline = archived.deserialize(&mut deserializer).unwrap();
        assert_eq!(spline, back);
        assert_eq!(archived.nodes.len(), spline.nodes().len());
    }
}
