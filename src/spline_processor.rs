//!
//! Spline playback of scalar values.
//!
//! Each index of a `SplineProcessor` plays back one spline, either supplied
//! by the caller (`set_splines`) or synthesized to reach a target value and
//! velocity at a target time (`set_targets`). Synthesized splines are owned
//! by the processor and recycled through a small pool.
//!

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;
use std::time::Duration;

use crate::base::{duration_to_spline_time, spline_time_to_duration, AnimError, SPLINE_PROCESSOR_PRIORITY};
use crate::bulk_spline_evaluator::{BulkSplineEvaluator, EvaluatorStrategy, SplinePlayback};
use crate::compact_spline::{CompactSpline, SplineAddMethod, DEFAULT_MAX_NODES};
use crate::math::Interval;
use crate::motivator::Motivator;
use crate::processor::{allocate_motivator, AnimProcessor, IndexedData, IndexedProcessor, ProcessorCore};

/// Buffer around the start and target values of a synthesized spline.
const TARGET_Y_RANGE_BUFFER: f32 = 1.2;

/// Synthesized modular splines may end half a range beyond either side.
const MODULAR_Y_RANGE_BUFFER: f32 = 2.0;

/// How an animation is played back, in time units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationPlayback {
    /// 0 pauses, 0.5 is slow motion, 2 is fast forward.
    pub playback_rate: f32,
    /// Time spent blending from the current value onto the new animation.
    pub blend_time: Duration,
    /// Time into the new animation at which playback starts.
    pub start_time: Duration,
    /// Added to every value, after scaling.
    pub value_offset: f32,
    /// Multiplies every value.
    pub value_scale: f32,
    pub repeat: bool,
}

impl Default for AnimationPlayback {
    fn default() -> AnimationPlayback {
        return AnimationPlayback {
            playback_rate: 1.0,
            blend_time: Duration::ZERO,
            start_time: Duration::ZERO,
            value_offset: 0.0,
            value_scale: 1.0,
            repeat: false,
        };
    }
}

impl AnimationPlayback {
    /// The same playback in spline units (milliseconds).
    pub fn to_spline_playback(&self) -> SplinePlayback {
        return SplinePlayback {
            playback_rate: self.playback_rate,
            blend_x: duration_to_spline_time(self.blend_time),
            start_x: duration_to_spline_time(self.start_time),
            y_offset: self.value_offset,
            y_scale: self.value_scale,
            repeat: self.repeat,
        };
    }
}

fn alloc_spline(pool: &mut Vec<CompactSpline>, max_nodes: u16) -> CompactSpline {
    match pool.iter().position(|s| s.max_nodes() >= max_nodes) {
        Some(pos) => pool.swap_remove(pos),
        None => CompactSpline::new(max_nodes),
    }
}

/// Per-index state of a `SplineProcessor`.
#[derive(Debug, Default)]
pub struct SplineData {
    evaluator: BulkSplineEvaluator,
    /// Splines synthesized by `set_targets`, owned by the processor.
    splines: Vec<Option<Rc<CompactSpline>>>,
    spline_pool: Vec<CompactSpline>,
}

impl SplineData {
    fn free_spline_for_index(&mut self, index: usize) {
        if let Some(spline) = self.splines[index].take() {
            self.free_spline(spline);
        }
    }

    fn free_spline(&mut self, spline: Rc<CompactSpline>) {
        // Still shared with someone else, let them keep it.
        if let Ok(spline) = Rc::try_unwrap(spline) {
            self.spline_pool.push(spline);
        }
    }
}

impl IndexedData for SplineData {
    fn set_num_indices(&mut self, num_indices: usize) {
        self.evaluator.set_num_indices(num_indices);
        let dropped: Vec<Rc<CompactSpline>> = self.splines.drain(num_indices.min(self.splines.len())..).flatten().collect();
        for spline in dropped {
            self.free_spline(spline);
        }
        self.splines.resize(num_indices, None);
    }

    fn move_indices(&mut self, old_index: usize, new_index: usize, count: usize) {
        for i in 0..count {
            self.splines[new_index + i] = self.splines[old_index + i].take();
        }
        self.evaluator.move_indices(old_index, new_index, count);
    }

    fn reset_indices(&mut self, index: usize, count: usize) {
        self.evaluator.reset_indices(index, count);
        for i in index..index + count {
            self.free_spline_for_index(i);
        }
    }

    fn supports_cloning(&self) -> bool {
        return true;
    }

    fn clone_indices(&mut self, dst: usize, src: usize, count: usize) -> Result<(), AnimError> {
        let SplineData {
            evaluator,
            splines,
            spline_pool,
        } = self;
        evaluator.copy_indices(dst, src, count, |dst_i, spline| {
            let owned = splines[src + (dst_i - dst)].clone();
            match owned {
                Some(owned) => {
                    let mut copy = alloc_spline(spline_pool, owned.max_nodes());
                    copy.clone_from(&owned);
                    let copy = Rc::new(copy);
                    splines[dst_i] = Some(copy.clone());
                    Some(copy)
                }
                None => spline.cloned(),
            }
        });
        return Ok(());
    }
}

///
/// Drives scalar values along splines.
///
#[derive(Debug, Default)]
pub struct SplineProcessor {
    core: ProcessorCore,
    data: SplineData,
}

pub type SplineMotivator = Motivator<SplineProcessor>;

impl SplineProcessor {
    pub fn new() -> SplineProcessor {
        return SplineProcessor::default();
    }

    /// A processor that evaluates its splines with `strategy`.
    pub fn with_strategy(strategy: Box<dyn EvaluatorStrategy>) -> SplineProcessor {
        return SplineProcessor {
            core: ProcessorCore::new(),
            data: SplineData {
                evaluator: BulkSplineEvaluator::with_strategy(strategy),
                ..SplineData::default()
            },
        };
    }

    /// Allocates a motivator driving `dimensions` values.
    pub fn allocate(processor: &Rc<RefCell<SplineProcessor>>, dimensions: usize) -> Result<SplineMotivator, AnimError> {
        return allocate_motivator(processor, dimensions);
    }

    #[inline]
    pub fn evaluator(&self) -> &BulkSplineEvaluator {
        return &self.data.evaluator;
    }

    #[inline]
    pub fn num_pooled_splines(&self) -> usize {
        return self.data.spline_pool.len();
    }

    /// Plays `splines[i]` on index `indices.start + i`. Owned splines are
    /// released once the evaluator has switched away from them.
    pub fn set_splines(
        &mut self,
        indices: Range<usize>,
        splines: &[Rc<CompactSpline>],
        playback: &AnimationPlayback,
    ) -> Result<(), AnimError> {
        check_dimensions(&indices, splines.len())?;
        self.data
            .evaluator
            .set_splines(indices.start, splines, &playback.to_spline_playback());
        for i in indices {
            self.data.free_spline_for_index(i);
        }
        return Ok(());
    }

    /// Moves each index towards `values[i]`, arriving with `velocities[i]`
    /// after `time`. A zero `time` jumps to the value immediately.
    pub fn set_targets(
        &mut self,
        indices: Range<usize>,
        values: &[f32],
        velocities: &[f32],
        time: Duration,
    ) -> Result<(), AnimError> {
        check_dimensions(&indices, values.len())?;
        check_dimensions(&indices, velocities.len())?;
        for (i, index) in indices.enumerate() {
            self.create_spline_to_target(index, values[i], velocities[i], time);
        }
        return Ok(());
    }

    fn create_spline_to_target(&mut self, index: usize, value: f32, velocity: f32, time: Duration) {
        let evaluator = &self.data.evaluator;
        let override_current = time.is_zero() || !evaluator.valid(index);
        let modular_range = evaluator.modular_range(index);

        let node_y = modular_range.map_or(value, |r| r.normalize_wild_value(value));
        let start_y = if override_current { node_y } else { evaluator.normalized_y(index) };
        let start_derivative = if override_current { velocity } else { evaluator.derivative(index) };

        let y_range = match modular_range {
            Some(range) => range.scaled(MODULAR_Y_RANGE_BUFFER),
            None => Interval::new(value.min(start_y), value.max(start_y)).scaled(TARGET_Y_RANGE_BUFFER),
        };

        let spline_time = duration_to_spline_time(time);
        let mut spline = alloc_spline(&mut self.data.spline_pool, DEFAULT_MAX_NODES);
        spline.init(y_range, CompactSpline::recommend_x_granularity(spline_time));
        spline.add_node(0.0, start_y, start_derivative, SplineAddMethod::EnsureCubicWellBehaved);

        if !override_current {
            let y = match modular_range {
                Some(range) => start_y + range.normalize_difference(range.normalize_wild_value(value) - start_y),
                None => value,
            };
            spline.add_node(spline_time, y, velocity, SplineAddMethod::AddWithoutModification);
        }

        let spline = Rc::new(spline);
        self.data
            .evaluator
            .set_splines(index, &[spline.clone()], &SplinePlayback::default());
        if let Some(old) = self.data.splines[index].replace(spline) {
            self.data.free_spline(old);
        }
    }

    #[inline]
    pub fn values(&self, indices: Range<usize>) -> &[f32] {
        return self.data.evaluator.ys(indices.start, indices.len());
    }

    pub fn velocities(&self, indices: Range<usize>) -> Vec<f32> {
        return indices.map(|i| self.data.evaluator.derivative(i)).collect();
    }

    /// Velocities ignoring the playback rate.
    pub fn directions(&self, indices: Range<usize>) -> Vec<f32> {
        return indices.map(|i| self.data.evaluator.derivative_without_playback(i)).collect();
    }

    pub fn target_values(&self, indices: Range<usize>) -> Vec<f32> {
        return indices.map(|i| self.data.evaluator.end_y(i)).collect();
    }

    pub fn target_velocities(&self, indices: Range<usize>) -> Vec<f32> {
        return indices.map(|i| self.data.evaluator.end_derivative(i)).collect();
    }

    /// Target minus current value, the short way around modular ranges.
    pub fn differences(&self, indices: Range<usize>) -> Vec<f32> {
        return indices.map(|i| self.data.evaluator.y_difference_to_end(i)).collect();
    }

    /// Longest time until any index reaches the end of its spline.
    pub fn time_remaining(&self, indices: Range<usize>) -> Duration {
        let evaluator = &self.data.evaluator;
        let greatest = indices
            .filter(|&i| evaluator.valid(i))
            .map(|i| evaluator.end_x(i) - evaluator.x(i))
            .fold(0.0f32, f32::max);
        return spline_time_to_duration(greatest);
    }

    #[inline]
    pub fn spline_time(&self, index: usize) -> Duration {
        return spline_time_to_duration(self.data.evaluator.x(index));
    }

    #[inline]
    pub fn splines(&self, indices: Range<usize>) -> Vec<Option<Rc<CompactSpline>>> {
        return self.data.evaluator.splines(indices.start, indices.len());
    }

    pub fn set_spline_time(&mut self, indices: Range<usize>, time: Duration) {
        self.data
            .evaluator
            .set_xs(indices.start, indices.len(), duration_to_spline_time(time));
    }

    pub fn set_spline_playback_rate(&mut self, indices: Range<usize>, playback_rate: f32) {
        self.data
            .evaluator
            .set_playback_rates(indices.start, indices.len(), playback_rate);
    }

    pub fn set_spline_repeating(&mut self, indices: Range<usize>, repeat: bool) {
        self.data.evaluator.set_repeating(indices.start, indices.len(), repeat);
    }

    /// True when every index is within `max_difference` of its target and
    /// moves slower than `max_velocity`.
    pub fn settled(&self, indices: Range<usize>, max_difference: f32, max_velocity: f32) -> bool {
        let evaluator = &self.data.evaluator;
        return indices.into_iter().all(|i| {
            evaluator.y_difference_to_end(i).abs() <= max_difference && evaluator.derivative(i).abs() <= max_velocity
        });
    }

    /// Values on these indices wrap around `modular_range`, e.g. angles.
    pub fn set_modular_range(&mut self, indices: Range<usize>, modular_range: Option<Interval>) {
        self.data
            .evaluator
            .set_y_ranges(indices.start, indices.len(), modular_range);
    }
}

#[inline]
fn check_dimensions(indices: &Range<usize>, actual: usize) -> Result<(), AnimError> {
    if indices.len() != actual {
        return Err(AnimError::DimensionMismatch {
            expected: indices.len(),
            actual,
        });
    }
    return Ok(());
}

impl AnimProcessor for SplineProcessor {
    fn advance_frame(&mut self, delta_time: Duration) -> Result<(), AnimError> {
        self.defragment();
        self.data.evaluator.advance_frame(duration_to_spline_time(delta_time));
        log::trace!("SplineProcessor advanced {} indices", self.core.num_indices());
        return Ok(());
    }

    fn priority(&self) -> i32 {
        return SPLINE_PROCESSOR_PRIORITY;
    }

    fn name(&self) -> &'static str {
        return "SplineProcessor";
    }

    fn verify_internal_state(&self) -> Result<(), AnimError> {
        self.core.verify_internal_state()?;
        if self.data.evaluator.num_indices() != self.core.num_indices() {
            return Err(AnimError::Unexcepted);
        }
        return Ok(());
    }
}

impl IndexedProcessor for SplineProcessor {
    type Data = SplineData;

    fn core(&self) -> &ProcessorCore {
        return &self.core;
    }

    fn parts(&mut self) -> (&mut ProcessorCore, &mut SplineData) {
        return (&mut self.core, &mut self.data);
    }
}

impl Motivator<SplineProcessor> {
    /// Value of the first dimension.
    pub fn value(&self) -> Result<f32, AnimError> {
        return self.with_indices(|p, r| p.values(r)[0]);
    }

    pub fn values(&self) -> Result<Vec<f32>, AnimError> {
        return self.with_indices(|p, r| p.values(r).to_vec());
    }

    /// Velocity of the first dimension.
    pub fn velocity(&self) -> Result<f32, AnimError> {
        return self.with_indices(|p, r| p.data.evaluator.derivative(r.start));
    }

    pub fn velocities(&self) -> Result<Vec<f32>, AnimError> {
        return self.with_indices(|p, r| p.velocities(r));
    }

    pub fn directions(&self) -> Result<Vec<f32>, AnimError> {
        return self.with_indices(|p, r| p.directions(r));
    }

    /// Target value of the first dimension.
    pub fn target_value(&self) -> Result<f32, AnimError> {
        return self.with_indices(|p, r| p.data.evaluator.end_y(r.start));
    }

    pub fn target_values(&self) -> Result<Vec<f32>, AnimError> {
        return self.with_indices(|p, r| p.target_values(r));
    }

    pub fn target_velocities(&self) -> Result<Vec<f32>, AnimError> {
        return self.with_indices(|p, r| p.target_velocities(r));
    }

    /// Distance to target of the first dimension.
    pub fn difference(&self) -> Result<f32, AnimError> {
        return self.with_indices(|p, r| p.data.evaluator.y_difference_to_end(r.start));
    }

    pub fn differences(&self) -> Result<Vec<f32>, AnimError> {
        return self.with_indices(|p, r| p.differences(r));
    }

    pub fn time_remaining(&self) -> Result<Duration, AnimError> {
        return self.with_indices(|p, r| p.time_remaining(r));
    }

    pub fn spline_time(&self) -> Result<Duration, AnimError> {
        return self.with_indices(|p, r| p.spline_time(r.start));
    }

    pub fn splines(&self) -> Result<Vec<Option<Rc<CompactSpline>>>, AnimError> {
        return self.with_indices(|p, r| p.splines(r));
    }

    pub fn settled(&self, max_difference: f32, max_velocity: f32) -> Result<bool, AnimError> {
        return self.with_indices(|p, r| p.settled(r, max_difference, max_velocity));
    }

    pub fn modular_range(&self) -> Result<Option<Interval>, AnimError> {
        return self.with_indices(|p, r| p.data.evaluator.modular_range(r.start));
    }

    pub fn set_target(&self, value: f32, velocity: f32, time: Duration) -> Result<(), AnimError> {
        return self.set_targets(&[value], &[velocity], time);
    }

    pub fn set_targets(&self, values: &[f32], velocities: &[f32], time: Duration) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.set_targets(r, values, velocities, time))?;
    }

    pub fn set_spline(&self, spline: Rc<CompactSpline>, playback: &AnimationPlayback) -> Result<(), AnimError> {
        return self.set_splines(&[spline], playback);
    }

    pub fn set_splines(&self, splines: &[Rc<CompactSpline>], playback: &AnimationPlayback) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.set_splines(r, splines, playback))?;
    }

    pub fn set_spline_time(&self, time: Duration) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.set_spline_time(r, time));
    }

    pub fn set_spline_playback_rate(&self, playback_rate: f32) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.set_spline_playback_rate(r, playback_rate));
    }

    pub fn set_spline_repeating(&self, repeat: bool) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.set_spline_repeating(r, repeat));
    }

    pub fn set_modular_range(&self, modular_range: Option<Interval>) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.set_modular_range(r, modular_range));
    }
}
