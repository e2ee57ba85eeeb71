//!
//! Transforms composed from scalar channels.
//!
//! Every index of a `TransformProcessor` holds a transform and a list of ops
//! sorted by channel type. An op is either a constant or a spline motivator
//! on the shared `SplineProcessor`. Each frame the transform is rebuilt from
//! the op values.
//!

use glam::Quat;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Duration;

use crate::animation_clip::{AnimChannel, AnimChannelType};
use crate::base::{AnimError, TRANSFORM_PROCESSOR_PRIORITY};
use crate::compact_spline::CompactSpline;
use crate::math::Transform;
use crate::motivator::Motivator;
use crate::processor::{allocate_motivator, AnimProcessor, IndexedData, IndexedProcessor, ProcessorCore};
use crate::spline_processor::{AnimationPlayback, SplineMotivator, SplineProcessor};

/// Splines store quantized values, an op resting within this of a value is on it.
const SETTLED_EPSILON: f32 = 1.0e-3;

fn apply_op(channel_type: AnimChannelType, value: f32, transform: &mut Transform) {
    let mut rotation = transform.rotation.to_array();
    match channel_type {
        AnimChannelType::TranslateX => transform.translation.x = value,
        AnimChannelType::TranslateY => transform.translation.y = value,
        AnimChannelType::TranslateZ => transform.translation.z = value,
        AnimChannelType::QuaternionX => rotation[0] = value,
        AnimChannelType::QuaternionY => rotation[1] = value,
        AnimChannelType::QuaternionZ => rotation[2] = value,
        AnimChannelType::QuaternionW => rotation[3] = value,
        AnimChannelType::ScaleX => transform.scale.x = value,
        AnimChannelType::ScaleY => transform.scale.y = value,
        AnimChannelType::ScaleZ => transform.scale.z = value,
    }
    if channel_type.is_quaternion() {
        transform.rotation = Quat::from_array(rotation);
    }
}

#[inline]
fn normalize_rotation(rotation: Quat) -> Quat {
    let length_sqr = rotation.length_squared();
    if !(length_sqr > 0.0) || !length_sqr.is_finite() {
        return Quat::IDENTITY;
    }
    return rotation / length_sqr.sqrt();
}

/// One channel of a transform: a constant, or a spline motivator when the
/// motivator is bound.
#[derive(Debug)]
struct TransformOp {
    channel_type: AnimChannelType,
    const_value: f32,
    motivator: SplineMotivator,
}

impl TransformOp {
    fn new(channel_type: AnimChannelType, const_value: f32) -> TransformOp {
        return TransformOp {
            channel_type,
            const_value,
            motivator: Motivator::invalid(),
        };
    }

    #[inline]
    fn driven(&self) -> bool {
        return self.motivator.id().is_some();
    }

    fn value(&self) -> Result<f32, AnimError> {
        if self.driven() {
            return self.motivator.value();
        }
        return Ok(self.const_value);
    }

    fn velocity(&self) -> Result<f32, AnimError> {
        if self.driven() {
            return self.motivator.velocity();
        }
        return Ok(0.0);
    }

    fn time_remaining(&self) -> Result<Duration, AnimError> {
        if self.driven() {
            return self.motivator.time_remaining();
        }
        return Ok(Duration::ZERO);
    }

    fn set_playback_rate(&self, playback_rate: f32) -> Result<(), AnimError> {
        if self.driven() {
            self.motivator.set_spline_playback_rate(playback_rate)?;
        }
        return Ok(());
    }

    fn set_repeating(&self, repeat: bool) -> Result<(), AnimError> {
        if self.driven() {
            self.motivator.set_spline_repeating(repeat)?;
        }
        return Ok(());
    }

    fn is_settled(&self, value: f32) -> Result<bool, AnimError> {
        if self.driven() {
            let difference = (self.motivator.value()? - value).abs();
            let velocity = self.motivator.velocity()?.abs();
            return Ok(difference < SETTLED_EPSILON && velocity < SETTLED_EPSILON);
        }
        return Ok(self.const_value == value);
    }

    fn try_clone(&self) -> Result<TransformOp, AnimError> {
        let motivator = match self.driven() {
            true => self.motivator.clone_motivator()?,
            false => Motivator::invalid(),
        };
        return Ok(TransformOp {
            channel_type: self.channel_type,
            const_value: self.const_value,
            motivator,
        });
    }

    fn bind(&mut self, splines: &Rc<RefCell<SplineProcessor>>) -> Result<(), AnimError> {
        self.motivator = SplineProcessor::allocate(splines, 1)?;
        return self.motivator.set_target(self.const_value, 0.0, Duration::ZERO);
    }

    fn blend_to_channel(
        &mut self,
        channel: &AnimChannel,
        playback: &AnimationPlayback,
        splines: &Rc<RefCell<SplineProcessor>>,
    ) -> Result<(), AnimError> {
        return match &channel.spline {
            Some(spline) => self.blend_to_spline(spline, playback, splines),
            None => self.blend_to_value(channel.start_value(), playback, splines),
        };
    }

    fn blend_to_value(
        &mut self,
        value: f32,
        playback: &AnimationPlayback,
        splines: &Rc<RefCell<SplineProcessor>>,
    ) -> Result<(), AnimError> {
        if !self.driven() {
            if playback.blend_time.is_zero() || self.const_value == value {
                self.const_value = value;
                return Ok(());
            }
            self.bind(splines)?;
            return self.motivator.set_target(value, 0.0, playback.blend_time);
        }

        // Already resting on the value, the op becomes a constant.
        if self.is_settled(value)? {
            self.motivator.invalidate();
            self.const_value = value;
            return Ok(());
        }
        return self.motivator.set_target(value, 0.0, playback.blend_time);
    }

    fn blend_to_spline(
        &mut self,
        spline: &Rc<CompactSpline>,
        playback: &AnimationPlayback,
        splines: &Rc<RefCell<SplineProcessor>>,
    ) -> Result<(), AnimError> {
        if !self.driven() {
            self.bind(splines)?;
        }
        return self.motivator.set_spline(spline.clone(), playback);
    }

    fn negate_if_quaternion(&mut self) -> Result<(), AnimError> {
        if !self.channel_type.is_quaternion() {
            return Ok(());
        }
        if self.driven() {
            let (value, velocity) = (self.motivator.value()?, self.motivator.velocity()?);
            return self.motivator.set_target(-value, -velocity, Duration::ZERO);
        }
        self.const_value = -self.const_value;
        return Ok(());
    }
}

/// State of one index of a `TransformProcessor`.
#[derive(Debug, Default)]
struct TransformData {
    transform: Transform,
    ops: Vec<TransformOp>,
}

impl TransformData {
    fn compose(&self) -> Result<Transform, AnimError> {
        let mut transform = Transform::identity();
        for op in &self.ops {
            apply_op(op.channel_type, op.value()?, &mut transform);
        }
        // Interpolated components drift off the unit sphere.
        transform.rotation = normalize_rotation(transform.rotation);
        return Ok(transform);
    }

    /// Flips the quaternion ops if the current rotation is on the other
    /// hemisphere from where `channels` starts.
    fn align_quaternion_ops(&mut self, channels: &[AnimChannel]) -> Result<(), AnimError> {
        let mut target = Transform::identity();
        for channel in channels.iter().filter(|c| c.channel_type.is_quaternion()) {
            apply_op(channel.channel_type, channel.start_value(), &mut target);
        }
        let target = normalize_rotation(target.rotation);

        if self.transform.rotation.dot(target) < 0.0 {
            for op in &mut self.ops {
                op.negate_if_quaternion()?;
            }
        }
        return Ok(());
    }

    /// Blends an op that has no counterpart in the new channels toward its
    /// default. Returns false if the op is already there and was removed.
    fn retire_op(
        &mut self,
        op_index: usize,
        playback: &AnimationPlayback,
        splines: &Rc<RefCell<SplineProcessor>>,
    ) -> Result<bool, AnimError> {
        let op = &mut self.ops[op_index];
        let default_value = op.channel_type.default_value();
        if op.is_settled(default_value)? {
            self.ops.remove(op_index);
            return Ok(false);
        }
        op.blend_to_value(default_value, playback, splines)?;
        return Ok(true);
    }
}

/// Per-index transforms of a `TransformProcessor`.
#[derive(Debug, Default)]
pub struct TransformTable {
    data: Vec<TransformData>,
}

impl TransformTable {
    fn get(&self, index: usize) -> Result<&TransformData, AnimError> {
        return self.data.get(index).ok_or(AnimError::InvalidIndex);
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut TransformData, AnimError> {
        return self.data.get_mut(index).ok_or(AnimError::InvalidIndex);
    }
}

impl IndexedData for TransformTable {
    fn set_num_indices(&mut self, num_indices: usize) {
        self.data.resize_with(num_indices, TransformData::default);
    }

    fn move_indices(&mut self, old_index: usize, new_index: usize, count: usize) {
        for i in 0..count {
            self.data.swap(new_index + i, old_index + i);
            self.data[old_index + i] = TransformData::default();
        }
    }

    fn reset_indices(&mut self, index: usize, count: usize) {
        for data in &mut self.data[index..index + count] {
            *data = TransformData::default();
        }
    }

    fn supports_cloning(&self) -> bool {
        return true;
    }

    fn clone_indices(&mut self, dst: usize, src: usize, count: usize) -> Result<(), AnimError> {
        for i in 0..count {
            let source = &self.data[src + i];
            let ops = source
                .ops
                .iter()
                .map(|op| op.try_clone())
                .collect::<Result<Vec<_>, _>>()?;
            let transform = source.transform;
            self.data[dst + i] = TransformData { transform, ops };
        }
        return Ok(());
    }
}

///
/// Drives transforms from channel lists, blending smoothly whenever a new
/// list replaces the current one.
///
#[derive(Debug)]
pub struct TransformProcessor {
    core: ProcessorCore,
    table: TransformTable,
    splines: Rc<RefCell<SplineProcessor>>,
}

pub type TransformMotivator = Motivator<TransformProcessor>;

impl TransformProcessor {
    /// A processor whose channels play on `splines`.
    pub fn new(splines: Rc<RefCell<SplineProcessor>>) -> TransformProcessor {
        return TransformProcessor {
            core: ProcessorCore::new(),
            table: TransformTable::default(),
            splines,
        };
    }

    pub fn allocate(processor: &Rc<RefCell<TransformProcessor>>) -> Result<TransformMotivator, AnimError> {
        return allocate_motivator(processor, 1);
    }

    #[inline]
    pub fn spline_processor(&self) -> &Rc<RefCell<SplineProcessor>> {
        return &self.splines;
    }

    /// Transform as of the last frame.
    pub fn value(&self, index: usize) -> Result<Transform, AnimError> {
        return Ok(self.table.get(index)?.transform);
    }

    /// Current type and value of every op on `index`.
    pub fn channel_values(&self, index: usize) -> Result<Vec<(AnimChannelType, f32)>, AnimError> {
        return self
            .table
            .get(index)?
            .ops
            .iter()
            .map(|op| Ok((op.channel_type, op.value()?)))
            .collect();
    }

    ///
    /// Starts playing `channels` on `index`.
    ///
    /// The op list and `channels` are merged by channel type. Matching ops
    /// blend onto their new channel, ops missing from `channels` blend to
    /// their default value (or are dropped once there), new channels get a
    /// new op. Blends take `playback.blend_time`.
    ///
    pub fn blend_to(
        &mut self,
        index: usize,
        channels: &[AnimChannel],
        playback: &AnimationPlayback,
    ) -> Result<(), AnimError> {
        if channels.windows(2).any(|w| w[0].channel_type >= w[1].channel_type) {
            return Err(AnimError::InvalidClip("channels not in ascending order"));
        }
        let splines = &self.splines;
        let data = self.table.get_mut(index)?;

        // q and -q are the same rotation, blending must take the short way.
        data.align_quaternion_ops(channels)?;

        let first_blend = data.ops.is_empty();
        if first_blend {
            for channel in channels {
                apply_op(channel.channel_type, channel.start_value(), &mut data.transform);
            }
            data.transform.rotation = normalize_rotation(data.transform.rotation);
        }
        let new_op = |channel: &AnimChannel| -> TransformOp {
            let start = match first_blend {
                true => channel.start_value(),
                false => channel.channel_type.default_value(),
            };
            return TransformOp::new(channel.channel_type, start);
        };

        let mut old_idx = 0;
        let mut new_idx = 0;
        while old_idx < data.ops.len() && new_idx < channels.len() {
            let channel = &channels[new_idx];
            match data.ops[old_idx].channel_type.cmp(&channel.channel_type) {
                Ordering::Equal => {
                    data.ops[old_idx].blend_to_channel(channel, playback, splines)?;
                    old_idx += 1;
                    new_idx += 1;
                }
                Ordering::Less => {
                    if data.retire_op(old_idx, playback, splines)? {
                        old_idx += 1;
                    }
                }
                Ordering::Greater => {
                    let mut op = new_op(channel);
                    op.blend_to_channel(channel, playback, splines)?;
                    data.ops.insert(old_idx, op);
                    old_idx += 1;
                    new_idx += 1;
                }
            }
        }

        while old_idx < data.ops.len() {
            if data.retire_op(old_idx, playback, splines)? {
                old_idx += 1;
            }
        }

        for channel in &channels[new_idx..] {
            let mut op = new_op(channel);
            op.blend_to_channel(channel, playback, splines)?;
            data.ops.push(op);
        }
        return Ok(());
    }

    pub fn set_playback_rate(&self, index: usize, playback_rate: f32) -> Result<(), AnimError> {
        for op in &self.table.get(index)?.ops {
            op.set_playback_rate(playback_rate)?;
        }
        return Ok(());
    }

    pub fn set_repeating(&self, index: usize, repeat: bool) -> Result<(), AnimError> {
        for op in &self.table.get(index)?.ops {
            op.set_repeating(repeat)?;
        }
        return Ok(());
    }

    /// Longest time until any op reaches the end of its spline.
    pub fn time_remaining(&self, index: usize) -> Result<Duration, AnimError> {
        let mut time = Duration::ZERO;
        for op in &self.table.get(index)?.ops {
            time = time.max(op.time_remaining()?);
        }
        return Ok(time);
    }

    /// True if no op on `index` is moving.
    pub fn settled(&self, index: usize) -> Result<bool, AnimError> {
        for op in &self.table.get(index)?.ops {
            if op.velocity()?.abs() >= SETTLED_EPSILON || !op.time_remaining()?.is_zero() {
                return Ok(false);
            }
        }
        return Ok(true);
    }
}

impl AnimProcessor for TransformProcessor {
    fn advance_frame(&mut self, _delta_time: Duration) -> Result<(), AnimError> {
        self.defragment();
        for data in &mut self.table.data {
            data.transform = data.compose()?;
        }
        log::trace!("TransformProcessor composed {} transforms", self.table.data.len());
        return Ok(());
    }

    fn priority(&self) -> i32 {
        return TRANSFORM_PROCESSOR_PRIORITY;
    }

    fn name(&self) -> &'static str {
        return "TransformProcessor";
    }

    fn verify_internal_state(&self) -> Result<(), AnimError> {
        self.core.verify_internal_state()?;
        if self.table.data.len() != self.core.num_indices() {
            return Err(AnimError::Unexcepted);
        }
        return Ok(());
    }
}

impl IndexedProcessor for TransformProcessor {
    type Data = TransformTable;

    fn core(&self) -> &ProcessorCore {
        return &self.core;
    }

    fn parts(&mut self) -> (&mut ProcessorCore, &mut TransformTable) {
        return (&mut self.core, &mut self.table);
    }
}

impl Motivator<TransformProcessor> {
    pub fn value(&self) -> Result<Transform, AnimError> {
        return self.with_indices(|p, r| p.value(r.start))?;
    }

    pub fn channel_values(&self) -> Result<Vec<(AnimChannelType, f32)>, AnimError> {
        return self.with_indices(|p, r| p.channel_values(r.start))?;
    }

    pub fn blend_to(&self, channels: &[AnimChannel], playback: &AnimationPlayback) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.blend_to(r.start, channels, playback))?;
    }

    pub fn set_playback_rate(&self, playback_rate: f32) -> Result<(), AnimError> {
        return self.with_indices(|p, r| p.set_playback_rate(r.start, playback_rate))?;
    }

    pub fn set_repeating(&self, repeat: bool) -> Result<(), AnimError> {
        return self.with_indices(|p, r| p.set_repeating(r.start, repeat))?;
    }

    pub fn time_remaining(&self) -> Result<Duration, AnimError> {
        return self.with_indices(|p, r| p.time_remaining(r.start))?;
    }

    pub fn settled(&self) -> Result<bool, AnimError> {
        return self.with_indices(|p, r| p.settled(r.start))?;
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use wasm_bindgen_test::*;

    use super::*;
    use crate::base::duration_to_spline_time;
    use crate::compact_spline::SplineAddMethod;
    use crate::math::Interval;

    const MS: Duration = Duration::from_millis(1);

    struct Fixture {
        splines: Rc<RefCell<SplineProcessor>>,
        transforms: Rc<RefCell<TransformProcessor>>,
    }

    impl Fixture {
        fn new() -> Fixture {
            let splines = Rc::new(RefCell::new(SplineProcessor::new()));
            let transforms = Rc::new(RefCell::new(TransformProcessor::new(splines.clone())));
            return Fixture { splines, transforms };
        }

        fn advance(&self, time: Duration) {
            self.splines.borrow_mut().advance_frame(time).unwrap();
            self.transforms.borrow_mut().advance_frame(time).unwrap();
        }
    }

    fn blend(time: Duration) -> AnimationPlayback {
        return AnimationPlayback {
            blend_time: time,
            ..AnimationPlayback::default()
        };
    }

    fn ramp(from: f32, to: f32, length_ms: f32) -> Rc<CompactSpline> {
        let range = Interval::new(from.min(to), from.max(to));
        let slope = (to - from) / length_ms;
        let mut spline = CompactSpline::with_range(range, length_ms / 1000.0, 4);
        spline.add_node(0.0, from, slope, SplineAddMethod::AddWithoutModification);
        spline.add_node(length_ms, to, slope, SplineAddMethod::AddWithoutModification);
        return Rc::new(spline);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_first_blend_starts_at_channels() {
        let f = Fixture::new();
        let m = TransformProcessor::allocate(&f.transforms).unwrap();
        let channels = [
            AnimChannel::with_constant(AnimChannelType::TranslateY, 2.0),
            AnimChannel::with_constant(AnimChannelType::ScaleZ, 4.0),
        ];
        m.blend_to(&channels, &blend(Duration::from_secs(1))).unwrap();
        let value = m.value().unwrap();
        assert_eq!(value.translation, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(value.scale, Vec3::new(1.0, 1.0, 4.0));

        // constants need no spline
        assert_eq!(f.splines.borrow().core().num_motivators(), 0);
        f.advance(10 * MS);
        assert_eq!(m.value().unwrap().scale.z, 4.0);
        assert!(m.settled().unwrap());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_blend_between_channels() {
        let f = Fixture::new();
        let m = TransformProcessor::allocate(&f.transforms).unwrap();
        m.blend_to(
            &[AnimChannel::with_constant(AnimChannelType::TranslateX, 5.0)],
            &blend(Duration::ZERO),
        )
        .unwrap();
        f.advance(MS);
        assert_eq!(m.value().unwrap().translation.x, 5.0);

        let playback = blend(Duration::from_secs(1));
        m.blend_to(&[AnimChannel::with_constant(AnimChannelType::TranslateY, 3.0)], &playback)
            .unwrap();
        assert_eq!(f.splines.borrow().core().num_motivators(), 2);
        let remaining = duration_to_spline_time(m.time_remaining().unwrap());
        assert!((remaining - 1000.0).abs() < 0.1);

        f.advance(500 * MS);
        let halfway = m.value().unwrap().translation;
        assert!(halfway.x > 0.1 && halfway.x < 4.9);
        assert!(halfway.y > 0.1 && halfway.y < 2.9);

        f.advance(500 * MS);
        let value = m.value().unwrap().translation;
        assert!(value.x.abs() < 1e-3);
        assert!((value.y - 3.0).abs() < 1e-3);

        // TranslateX rests at its default and is dropped by the next blend
        m.blend_to(&[AnimChannel::with_constant(AnimChannelType::TranslateY, 3.0)], &playback)
            .unwrap();
        let ops = m.channel_values().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].0, AnimChannelType::TranslateY);
        assert!((ops[0].1 - 3.0).abs() < 1e-3);
        assert!(f.transforms.borrow().verify_internal_state().is_ok());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_spline_channel() {
        let f = Fixture::new();
        let m = TransformProcessor::allocate(&f.transforms).unwrap();
        let channels = [AnimChannel::with_spline(AnimChannelType::TranslateZ, ramp(0.0, 10.0, 1000.0))];
        m.blend_to(&channels, &AnimationPlayback::default()).unwrap();
        assert_eq!(f.splines.borrow().core().num_motivators(), 1);

        f.advance(250 * MS);
        assert!((m.value().unwrap().translation.z - 2.5).abs() < 1e-2);
        m.set_playback_rate(2.0).unwrap();
        f.advance(250 * MS);
        assert!((m.value().unwrap().translation.z - 7.5).abs() < 1e-2);
        assert!(!m.settled().unwrap());
        f.advance(500 * MS);
        assert!((m.value().unwrap().translation.z - 10.0).abs() < 1e-2);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_quaternion_sign_alignment() {
        let f = Fixture::new();
        let m = TransformProcessor::allocate(&f.transforms).unwrap();
        let q = Quat::from_rotation_z(0.5);
        let quat = |q: Quat| -> Vec<AnimChannel> {
            return vec![
                AnimChannel::with_constant(AnimChannelType::QuaternionX, q.x),
                AnimChannel::with_constant(AnimChannelType::QuaternionY, q.y),
                AnimChannel::with_constant(AnimChannelType::QuaternionZ, q.z),
                AnimChannel::with_constant(AnimChannelType::QuaternionW, q.w),
            ];
        };
        m.blend_to(&quat(q), &blend(Duration::ZERO)).unwrap();
        f.advance(MS);

        // same rotation, opposite sign: nothing should move
        m.blend_to(&quat(-q), &blend(Duration::from_secs(1))).unwrap();
        f.advance(500 * MS);
        let rotation = m.value().unwrap().rotation;
        assert!(rotation.dot(-q).abs() > 0.9999);
        for (_, value) in m.channel_values().unwrap() {
            assert!(value.abs() <= 1.0);
        }
        assert!(m.value().unwrap().rotation.is_normalized());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_invalid_channels() {
        let f = Fixture::new();
        let m = TransformProcessor::allocate(&f.transforms).unwrap();
        let channels = [
            AnimChannel::with_default(AnimChannelType::ScaleX),
            AnimChannel::with_default(AnimChannelType::TranslateX),
        ];
        let err = m.blend_to(&channels, &AnimationPlayback::default()).unwrap_err();
        assert!(err.is_invalid_clip());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_clone_and_drop() {
        let f = Fixture::new();
        let a = TransformProcessor::allocate(&f.transforms).unwrap();
        let channels = [AnimChannel::with_spline(AnimChannelType::TranslateX, ramp(0.0, 10.0, 1000.0))];
        a.blend_to(&channels, &AnimationPlayback::default()).unwrap();
        f.advance(100 * MS);

        let b = a.clone_motivator().unwrap();
        assert_eq!(f.splines.borrow().core().num_motivators(), 2);
        f.advance(100 * MS);
        assert_eq!(a.value().unwrap(), b.value().unwrap());

        drop(a);
        assert_eq!(f.splines.borrow().core().num_motivators(), 1);
        f.advance(100 * MS);
        assert!((b.value().unwrap().translation.x - 3.0).abs() < 1e-2);
        drop(b);
        assert_eq!(f.splines.borrow().core().num_motivators(), 0);
        assert!(f.splines.borrow().verify_internal_state().is_ok());
        assert!(f.transforms.borrow().verify_internal_state().is_ok());
    }
}
