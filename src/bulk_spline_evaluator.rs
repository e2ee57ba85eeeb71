//!
//! Batch playback of many splines in lockstep.
//!
//! Each index plays back one `CompactSpline`. Per frame, every index's x is
//! advanced by the same `delta_x` (scaled by the index's playback rate),
//! indices that ran past the end of their current segment are re-initialized,
//! then every y value is evaluated from its segment's cubic.
//!
//! Data is stored as a struct of arrays, so the two hot loops (advance x and
//! evaluate cubics) only touch the arrays they need. Both loops are delegated
//! to an `EvaluatorStrategy`.
//!

use glam::Vec4;
use std::fmt::Debug;
use std::rc::Rc;

use crate::compact_spline::{outside_spline, CompactSpline, CompactSplineIndex, INVALID_SPLINE_INDEX};
use crate::cubic_curve::{CubicCurve, CubicInit};
use crate::math::Interval;

/// How a spline is played back on one index.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SplinePlayback {
    /// Multiplier on `delta_x`. 0 pauses, 2 plays twice as fast.
    pub playback_rate: f32,
    /// If positive and the index is already playing, blend from the current
    /// curve onto the new spline over this much x.
    pub blend_x: f32,
    /// x at which playback starts.
    pub start_x: f32,
    /// Added to the spline's y after scaling.
    pub y_offset: f32,
    /// Multiplier on the spline's y.
    pub y_scale: f32,
    /// Restart from x = 0 when the end is reached.
    pub repeat: bool,
}

impl Default for SplinePlayback {
    fn default() -> SplinePlayback {
        return SplinePlayback {
            playback_rate: 1.0,
            blend_x: 0.0,
            start_x: 0.0,
            y_offset: 0.0,
            y_scale: 1.0,
            repeat: false,
        };
    }
}

///
/// The two hot loops of `BulkSplineEvaluator::advance_frame`.
///
/// Implementations must produce identical results: they only differ in how
/// the work is laid out.
///
pub trait EvaluatorStrategy: Debug {
    /// `xs[i] += delta_x * rates[i]`, then appends to `indices_to_init`, in
    /// ascending order, every `i` with `xs[i] > x_ends[i]`.
    fn update_cubic_xs(
        &self,
        delta_x: f32,
        rates: &[f32],
        x_ends: &[f32],
        xs: &mut [f32],
        indices_to_init: &mut Vec<usize>,
    );

    /// `ys[i] = cubics[i].evaluate(xs[i])`
    fn evaluate_cubics(&self, cubics: &[CubicCurve], xs: &[f32], ys: &mut [f32]);
}

/// Processes one index at a time, recording indices to re-init as it goes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarStrategy;

impl EvaluatorStrategy for ScalarStrategy {
    fn update_cubic_xs(
        &self,
        delta_x: f32,
        rates: &[f32],
        x_ends: &[f32],
        xs: &mut [f32],
        indices_to_init: &mut Vec<usize>,
    ) {
        for (i, x) in xs.iter_mut().enumerate() {
            *x += delta_x * rates[i];
            if *x > x_ends[i] {
                indices_to_init.push(i);
            }
        }
    }

    fn evaluate_cubics(&self, cubics: &[CubicCurve], xs: &[f32], ys: &mut [f32]) {
        for (i, y) in ys.iter_mut().enumerate() {
            *y = cubics[i].evaluate(xs[i]);
        }
    }
}

/// Processes four indices per step: first a lane mask of indices past their
/// segment end is computed, then the mask is gathered into indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneStrategy;

const LANES: usize = 4;

impl EvaluatorStrategy for LaneStrategy {
    fn update_cubic_xs(
        &self,
        delta_x: f32,
        rates: &[f32],
        x_ends: &[f32],
        xs: &mut [f32],
        indices_to_init: &mut Vec<usize>,
    ) {
        let num = xs.len();
        let num_lanes = num - num % LANES;
        let delta = Vec4::splat(delta_x);

        let mut masks: Vec<u8> = Vec::with_capacity(num_lanes / LANES + 1);
        for start in (0..num_lanes).step_by(LANES) {
            let end = start + LANES;
            let lane_xs = Vec4::from_slice(&xs[start..end]) + delta * Vec4::from_slice(&rates[start..end]);
            lane_xs.write_to_slice(&mut xs[start..end]);
            masks.push(lane_xs.cmpgt(Vec4::from_slice(&x_ends[start..end])).bitmask() as u8);
        }

        for (chunk, mask) in masks.iter().enumerate() {
            for lane in 0..LANES {
                if mask & (1 << lane) != 0 {
                    indices_to_init.push(chunk * LANES + lane);
                }
            }
        }

        ScalarStrategy.update_cubic_xs_from(num_lanes, delta_x, rates, x_ends, xs, indices_to_init);
    }

    fn evaluate_cubics(&self, cubics: &[CubicCurve], xs: &[f32], ys: &mut [f32]) {
        let num = ys.len();
        let num_lanes = num - num % LANES;
        for start in (0..num_lanes).step_by(LANES) {
            let c = &cubics[start..start + LANES];
            let coeffs = |k: usize| Vec4::new(c[0].coeff(k), c[1].coeff(k), c[2].coeff(k), c[3].coeff(k));
            let x = Vec4::from_slice(&xs[start..start + LANES]);
            let y = ((coeffs(3) * x + coeffs(2)) * x + coeffs(1)) * x + coeffs(0);
            y.write_to_slice(&mut ys[start..start + LANES]);
        }
        for i in num_lanes..num {
            ys[i] = cubics[i].evaluate(xs[i]);
        }
    }
}

impl ScalarStrategy {
    fn update_cubic_xs_from(
        &self,
        first: usize,
        delta_x: f32,
        rates: &[f32],
        x_ends: &[f32],
        xs: &mut [f32],
        indices_to_init: &mut Vec<usize>,
    ) {
        for i in first..xs.len() {
            xs[i] += delta_x * rates[i];
            if xs[i] > x_ends[i] {
                indices_to_init.push(i);
            }
        }
    }
}

/// Strategy selected by the `simd` feature.
pub fn default_strategy() -> Box<dyn EvaluatorStrategy> {
    if cfg!(feature = "simd") {
        return Box::new(LaneStrategy);
    }
    return Box::new(ScalarStrategy);
}

#[derive(Debug, Clone)]
struct Source {
    spline: Option<Rc<CompactSpline>>,
    x_index: CompactSplineIndex,
    y_offset: f32,
    y_scale: f32,
    repeat: bool,
}

impl Default for Source {
    fn default() -> Source {
        return Source {
            spline: None,
            x_index: INVALID_SPLINE_INDEX,
            y_offset: 0.0,
            y_scale: 1.0,
            repeat: false,
        };
    }
}

///
/// Evaluates a set of splines, indexed `0..num_indices()`.
///
/// The evaluator shares the splines it plays (`Rc`), it never modifies them.
/// Indices are plain array slots, keeping them dense is the caller's job
/// (see `IndexAllocator`).
///
#[derive(Debug)]
pub struct BulkSplineEvaluator {
    sources: Vec<Source>,
    rates: Vec<f32>,
    modular_ranges: Vec<Option<Interval>>,
    cubic_xs: Vec<f32>,
    cubic_x_ends: Vec<f32>,
    cubics: Vec<CubicCurve>,
    ys: Vec<f32>,
    scratch: Vec<usize>,
    strategy: Box<dyn EvaluatorStrategy>,
}

impl Default for BulkSplineEvaluator {
    fn default() -> BulkSplineEvaluator {
        return BulkSplineEvaluator::new();
    }
}

impl BulkSplineEvaluator {
    pub fn new() -> BulkSplineEvaluator {
        return BulkSplineEvaluator::with_strategy(default_strategy());
    }

    pub fn with_strategy(strategy: Box<dyn EvaluatorStrategy>) -> BulkSplineEvaluator {
        return BulkSplineEvaluator {
            sources: Vec::new(),
            rates: Vec::new(),
            modular_ranges: Vec::new(),
            cubic_xs: Vec::new(),
            cubic_x_ends: Vec::new(),
            cubics: Vec::new(),
            ys: Vec::new(),
            scratch: Vec::new(),
            strategy,
        };
    }

    #[inline]
    pub fn num_indices(&self) -> usize {
        return self.sources.len();
    }

    /// Grows or shrinks the number of indices. Indices are added or removed
    /// at the high end.
    pub fn set_num_indices(&mut self, num_indices: usize) {
        self.sources.resize(num_indices, Source::default());
        self.rates.resize(num_indices, 1.0);
        self.modular_ranges.resize(num_indices, None);
        self.cubic_xs.resize(num_indices, 0.0);
        self.cubic_x_ends.resize(num_indices, 0.0);
        self.cubics.resize(num_indices, CubicCurve::default());
        self.ys.resize(num_indices, 0.0);
    }

    /// Moves `count` indices from `old_index` to `new_index`. The old indices
    /// keep a copy; the caller resets or discards them.
    pub fn move_indices(&mut self, old_index: usize, new_index: usize, count: usize) {
        for i in 0..count {
            let (old_i, new_i) = (old_index + i, new_index + i);
            self.sources[new_i] = self.sources[old_i].clone();
            self.rates[new_i] = self.rates[old_i];
            self.modular_ranges[new_i] = self.modular_ranges[old_i];
            self.cubic_xs[new_i] = self.cubic_xs[old_i];
            self.cubic_x_ends[new_i] = self.cubic_x_ends[old_i];
            self.cubics[new_i] = self.cubics[old_i];
            self.ys[new_i] = self.ys[old_i];
        }
    }

    /// Copies `count` indices from `src` to `dst`. `alloc(dst_index, spline)`
    /// decides which spline the copy plays, typically a deep copy.
    pub fn copy_indices<F>(&mut self, dst: usize, src: usize, count: usize, mut alloc: F)
    where
        F: FnMut(usize, Option<&Rc<CompactSpline>>) -> Option<Rc<CompactSpline>>,
    {
        self.move_indices(src, dst, count);
        for i in 0..count {
            let spline = alloc(dst + i, self.sources[src + i].spline.as_ref());
            self.sources[dst + i].spline = spline;
        }
    }

    /// Values on these indices wrap around `modular_range`, e.g. angles in
    /// `[-pi, pi]`. `None`, or an empty range, disables modular arithmetic.
    pub fn set_y_ranges(&mut self, index: usize, count: usize, modular_range: Option<Interval>) {
        let range = modular_range.filter(|r| r.size() > 0.0);
        for r in &mut self.modular_ranges[index..index + count] {
            *r = range;
        }
    }

    /// Starts playing `splines[i]` on index `index + i`.
    ///
    /// An index that is already playing, with `playback.blend_x > 0`, first
    /// follows a transition curve from its current state onto the new spline.
    /// Otherwise it jumps straight to `playback.start_x`.
    pub fn set_splines(&mut self, index: usize, splines: &[Rc<CompactSpline>], playback: &SplinePlayback) {
        for (i, spline) in splines.iter().enumerate() {
            let idx = index + i;
            let should_blend = self.sources[idx].spline.is_some() && playback.blend_x > 0.0;
            if should_blend {
                self.blend_to_spline(idx, spline, playback);
            } else {
                self.jump_to_spline(idx, spline, playback);
            }
            self.evaluate_index(idx);
        }
    }

    /// Stops playback. The current y is held.
    pub fn clear_splines(&mut self, index: usize, count: usize) {
        for i in index..index + count {
            self.sources[i].spline = None;
            self.cubics[i] = CubicCurve::constant(self.ys[i]);
            self.cubic_xs[i] = 0.0;
            self.cubic_x_ends[i] = f32::INFINITY;
        }
    }

    /// Returns indices to their initial state: no spline, y of zero, a
    /// playback rate of one, not repeating and no modular range.
    pub fn reset_indices(&mut self, index: usize, count: usize) {
        for i in index..index + count {
            self.sources[i] = Source::default();
            self.rates[i] = 1.0;
            self.modular_ranges[i] = None;
            self.cubics[i] = CubicCurve::constant(0.0);
            self.cubic_xs[i] = 0.0;
            self.cubic_x_ends[i] = f32::INFINITY;
            self.ys[i] = 0.0;
        }
    }

    /// Repositions playback to `x`.
    pub fn set_xs(&mut self, index: usize, count: usize, x: f32) {
        for i in index..index + count {
            self.init_cubic(i, x);
            self.evaluate_index(i);
        }
    }

    pub fn set_playback_rates(&mut self, index: usize, count: usize, playback_rate: f32) {
        for rate in &mut self.rates[index..index + count] {
            *rate = playback_rate;
        }
    }

    pub fn set_repeating(&mut self, index: usize, count: usize, repeat: bool) {
        for source in &mut self.sources[index..index + count] {
            source.repeat = repeat;
        }
    }

    /// Advances every index by `delta_x * playback_rate` and re-evaluates.
    pub fn advance_frame(&mut self, delta_x: f32) {
        let mut indices_to_init = std::mem::take(&mut self.scratch);
        indices_to_init.clear();
        self.strategy.update_cubic_xs(
            delta_x,
            &self.rates,
            &self.cubic_x_ends,
            &mut self.cubic_xs,
            &mut indices_to_init,
        );

        for &index in &indices_to_init {
            let x = self.x(index);
            self.init_cubic(index, x);
        }
        self.scratch = indices_to_init;

        self.strategy.evaluate_cubics(&self.cubics, &self.cubic_xs, &mut self.ys);
    }

    fn blend_init(&self, index: usize, spline: &CompactSpline, playback: &SplinePlayback) -> CubicInit {
        let blend_width = playback.blend_x * playback.playback_rate;
        let (blend_end_index, blend_end_x) = spline.index_for_x_allowing_repeat(
            playback.start_x + blend_width,
            INVALID_SPLINE_INDEX,
            playback.repeat,
        );

        let (mut end_y, end_derivative) = if outside_spline(blend_end_index) {
            (spline.node_y(blend_end_index), 0.0)
        } else {
            let curve = CubicCurve::from_init(&spline.create_cubic_init(blend_end_index));
            let curve_x = blend_end_x - spline.node_x(blend_end_index);
            (curve.evaluate(curve_x), curve.derivative(curve_x))
        };
        end_y = end_y * playback.y_scale + playback.y_offset;

        // The transition advances at the new rate, so its slope is in x units
        // of the new playback.
        let mut start_y = self.ys[index];
        let start_derivative = if playback.playback_rate != 0.0 {
            self.derivative(index) / playback.playback_rate
        } else {
            0.0
        };

        // Take the shortest path around a modular range.
        if let Some(range) = self.modular_ranges[index] {
            start_y = range.normalize_close_value(start_y);
            let end_y_normalized = range.normalize_close_value(end_y);
            end_y = start_y + range.normalize_difference(end_y_normalized - start_y);
        }

        return CubicInit::new(
            start_y,
            start_derivative,
            end_y,
            end_derivative * playback.y_scale,
            blend_width,
        );
    }

    fn blend_to_spline(&mut self, index: usize, spline: &Rc<CompactSpline>, playback: &SplinePlayback) {
        let blend_init = self.blend_init(index, spline, playback);

        // The transition curve is shifted to overlap the target spline's
        // segment, so leaving it re-initializes straight onto the target.
        let (blend_start_index, blend_start_x) =
            spline.index_for_x_allowing_repeat(playback.start_x, INVALID_SPLINE_INDEX, playback.repeat);
        let cubic_start_x = blend_start_x - spline.node_x(blend_start_index);

        self.set_source(index, spline, playback, blend_start_index);
        self.cubic_xs[index] = cubic_start_x;
        self.cubic_x_ends[index] = cubic_start_x + blend_init.width_x;
        let cubic = &mut self.cubics[index];
        cubic.init(&blend_init);
        cubic.shift_right(cubic_start_x);
    }

    fn jump_to_spline(&mut self, index: usize, spline: &Rc<CompactSpline>, playback: &SplinePlayback) {
        self.set_source(index, spline, playback, INVALID_SPLINE_INDEX);
        self.init_cubic(index, playback.start_x);
    }

    fn set_source(
        &mut self,
        index: usize,
        spline: &Rc<CompactSpline>,
        playback: &SplinePlayback,
        x_index: CompactSplineIndex,
    ) {
        self.rates[index] = playback.playback_rate;
        self.sources[index] = Source {
            spline: Some(spline.clone()),
            x_index,
            y_offset: playback.y_offset,
            y_scale: playback.y_scale,
            repeat: playback.repeat,
        };
    }

    fn init_cubic(&mut self, index: usize, start_x: f32) {
        let source = &mut self.sources[index];
        let Some(spline) = source.spline.as_ref() else {
            return;
        };

        let (x_index, new_start_x) =
            spline.index_for_x_allowing_repeat(start_x, source.x_index.wrapping_add(1), source.repeat);
        let x_range = spline.interval_x_at(x_index);
        let mut cubic = CubicCurve::from_init(&spline.create_cubic_init(x_index));
        cubic.scale_up(source.y_scale);
        cubic.shift_up(source.y_offset);

        source.x_index = x_index;
        self.cubic_xs[index] = new_start_x - x_range.min;
        self.cubic_x_ends[index] = x_range.size();
        self.cubics[index] = cubic;
    }

    #[inline]
    fn evaluate_index(&mut self, index: usize) {
        self.ys[index] = self.cubics[index].evaluate(self.cubic_xs[index]);
    }

    fn cubic_start_x(&self, index: usize) -> f32 {
        let source = &self.sources[index];
        return source.spline.as_ref().map_or(0.0, |s| s.node_x(source.x_index));
    }
}

impl BulkSplineEvaluator {
    /// True if `index` exists and is playing a spline.
    #[inline]
    pub fn valid(&self, index: usize) -> bool {
        return index < self.num_indices() && self.sources[index].spline.is_some();
    }

    /// Current x on the spline.
    #[inline]
    pub fn x(&self, index: usize) -> f32 {
        return self.cubic_start_x(index) + self.cubic_xs[index];
    }

    #[inline]
    pub fn y(&self, index: usize) -> f32 {
        return self.ys[index];
    }

    /// Current ys of `count` indices starting at `index`.
    #[inline]
    pub fn ys(&self, index: usize, count: usize) -> &[f32] {
        return &self.ys[index..index + count];
    }

    /// Current y brought into the modular range, if there is one.
    #[inline]
    pub fn normalized_y(&self, index: usize) -> f32 {
        return self.normalize_y(index, self.ys[index]);
    }

    /// Slope with respect to `delta_x`, i.e. including the playback rate.
    #[inline]
    pub fn derivative(&self, index: usize) -> f32 {
        return self.rates[index] * self.derivative_without_playback(index);
    }

    /// Slope of the underlying spline, ignoring the playback rate.
    #[inline]
    pub fn derivative_without_playback(&self, index: usize) -> f32 {
        return self.cubics[index].derivative(self.cubic_xs[index]);
    }

    #[inline]
    pub fn playback_rate(&self, index: usize) -> f32 {
        return self.rates[index];
    }

    #[inline]
    pub fn repeat(&self, index: usize) -> bool {
        return self.sources[index].repeat;
    }

    #[inline]
    pub fn source_spline(&self, index: usize) -> Option<&Rc<CompactSpline>> {
        return self.sources[index].spline.as_ref();
    }

    /// Splines playing on `count` indices starting at `index`.
    pub fn splines(&self, index: usize, count: usize) -> Vec<Option<Rc<CompactSpline>>> {
        return self.sources[index..index + count].iter().map(|s| s.spline.clone()).collect();
    }

    /// Cubic of the current segment, with x relative to the segment start.
    #[inline]
    pub fn cubic(&self, index: usize) -> &CubicCurve {
        return &self.cubics[index];
    }

    #[inline]
    pub fn cubic_x(&self, index: usize) -> f32 {
        return self.cubic_xs[index];
    }

    #[inline]
    pub fn end_x(&self, index: usize) -> f32 {
        return self.sources[index].spline.as_ref().map_or(0.0, |s| s.end_x());
    }

    /// Spline's final y, with the playback's scale and offset.
    #[inline]
    pub fn end_y(&self, index: usize) -> f32 {
        let source = &self.sources[index];
        return source
            .spline
            .as_ref()
            .map_or(self.ys[index], |s| s.end_y() * source.y_scale + source.y_offset);
    }

    #[inline]
    pub fn end_derivative(&self, index: usize) -> f32 {
        return self.rates[index] * self.end_derivative_without_playback(index);
    }

    #[inline]
    pub fn end_derivative_without_playback(&self, index: usize) -> f32 {
        let source = &self.sources[index];
        return source.spline.as_ref().map_or(0.0, |s| s.end_derivative() * source.y_scale);
    }

    /// `end_y - y`, taking the shorter way around a modular range.
    #[inline]
    pub fn y_difference_to_end(&self, index: usize) -> f32 {
        let difference = self.end_y(index) - self.y(index);
        return match self.modular_ranges[index] {
            Some(range) => range.normalize_difference(range.normalize_close_value(difference)),
            None => difference,
        };
    }

    /// Brings `y` into the modular range of `index`, if there is one.
    #[inline]
    pub fn normalize_y(&self, index: usize, y: f32) -> f32 {
        return match self.modular_ranges[index] {
            Some(range) => range.normalize_close_value(y),
            None => y,
        };
    }

    #[inline]
    pub fn modular_arithmetic(&self, index: usize) -> bool {
        return self.modular_ranges[index].is_some();
    }

    #[inline]
    pub fn modular_range(&self, index: usize) -> Option<Interval> {
        return self.modular_ranges[index];
    }
}
