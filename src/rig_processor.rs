//!
//! Skeletons driven by animation clips.
//!
//! A rig index owns one `TransformMotivator` per bone of its current clip
//! and, after each frame, the root-relative matrix of every bone.
//!

use glam::Mat4;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::animation_clip::AnimationClip;
use crate::base::{AnimError, RIG_PROCESSOR_PRIORITY};
use crate::motivator::Motivator;
use crate::processor::{allocate_motivator, AnimProcessor, IndexedData, IndexedProcessor, ProcessorCore};
use crate::spline_processor::AnimationPlayback;
use crate::transform_processor::{TransformMotivator, TransformProcessor};

#[derive(Debug, Default)]
struct RigData {
    clip: Option<Rc<AnimationClip>>,
    bones: Vec<TransformMotivator>,
    global_transforms: Vec<Mat4>,
}

/// Per-index rigs of a `RigProcessor`.
#[derive(Debug, Default)]
pub struct RigTable {
    data: Vec<RigData>,
}

impl RigTable {
    fn get(&self, index: usize) -> Result<&RigData, AnimError> {
        return self.data.get(index).ok_or(AnimError::InvalidIndex);
    }
}

impl IndexedData for RigTable {
    fn set_num_indices(&mut self, num_indices: usize) {
        self.data.resize_with(num_indices, RigData::default);
    }

    fn move_indices(&mut self, old_index: usize, new_index: usize, count: usize) {
        for i in 0..count {
            self.data.swap(new_index + i, old_index + i);
            self.data[old_index + i] = RigData::default();
        }
    }

    fn reset_indices(&mut self, index: usize, count: usize) {
        for data in &mut self.data[index..index + count] {
            *data = RigData::default();
        }
    }
}

///
/// Plays animation clips on skeletons.
///
/// Bones are composed in ascending order, which visits every parent before
/// its children:
/// `global[i] = global[parent[i]] * local[i]`, or `local[i]` for roots.
///
#[derive(Debug)]
pub struct RigProcessor {
    core: ProcessorCore,
    table: RigTable,
    transforms: Rc<RefCell<TransformProcessor>>,
}

pub type RigMotivator = Motivator<RigProcessor>;

impl RigProcessor {
    /// A processor whose bones play on `transforms`.
    pub fn new(transforms: Rc<RefCell<TransformProcessor>>) -> RigProcessor {
        return RigProcessor {
            core: ProcessorCore::new(),
            table: RigTable::default(),
            transforms,
        };
    }

    pub fn allocate(processor: &Rc<RefCell<RigProcessor>>) -> Result<RigMotivator, AnimError> {
        return allocate_motivator(processor, 1);
    }

    #[inline]
    pub fn transform_processor(&self) -> &Rc<RefCell<TransformProcessor>> {
        return &self.transforms;
    }

    /// Starts playing `clip` on `index`, blending every bone from its
    /// current transform. The clip must be ready.
    pub fn blend_to_anim(
        &mut self,
        index: usize,
        clip: &Rc<AnimationClip>,
        playback: &AnimationPlayback,
    ) -> Result<(), AnimError> {
        let clip_data = clip.data()?;
        let data = self.table.data.get_mut(index).ok_or(AnimError::InvalidIndex)?;

        let num_bones = clip_data.num_bones();
        data.bones.truncate(num_bones);
        while data.bones.len() < num_bones {
            data.bones.push(TransformProcessor::allocate(&self.transforms)?);
        }
        data.global_transforms.resize(num_bones, Mat4::IDENTITY);

        let playback = AnimationPlayback {
            repeat: playback.repeat || clip_data.repeat(),
            ..*playback
        };
        for (bone, motivator) in data.bones.iter().enumerate() {
            motivator.blend_to(clip_data.channels(bone)?, &playback)?;
        }
        data.clip = Some(clip.clone());
        log::debug!("Rig {} blending to clip '{}' ({} bones)", index, clip.uri(), num_bones);
        return Ok(());
    }

    /// Root-relative matrix of every bone, as of the last frame.
    pub fn global_transforms(&self, index: usize) -> Result<&[Mat4], AnimError> {
        return Ok(&self.table.get(index)?.global_transforms);
    }

    pub fn current_clip(&self, index: usize) -> Result<Option<Rc<AnimationClip>>, AnimError> {
        return Ok(self.table.get(index)?.clip.clone());
    }

    pub fn num_bones(&self, index: usize) -> Result<usize, AnimError> {
        return Ok(self.table.get(index)?.bones.len());
    }

    /// Longest time until any bone finishes its animation.
    pub fn time_remaining(&self, index: usize) -> Result<Duration, AnimError> {
        let mut time = Duration::ZERO;
        for bone in &self.table.get(index)?.bones {
            time = time.max(bone.time_remaining()?);
        }
        return Ok(time);
    }

    pub fn set_playback_rate(&self, index: usize, playback_rate: f32) -> Result<(), AnimError> {
        for bone in &self.table.get(index)?.bones {
            bone.set_playback_rate(playback_rate)?;
        }
        return Ok(());
    }

    pub fn set_repeating(&self, index: usize, repeat: bool) -> Result<(), AnimError> {
        for bone in &self.table.get(index)?.bones {
            bone.set_repeating(repeat)?;
        }
        return Ok(());
    }
}

impl AnimProcessor for RigProcessor {
    fn advance_frame(&mut self, _delta_time: Duration) -> Result<(), AnimError> {
        self.defragment();
        for data in &mut self.table.data {
            let Some(clip) = &data.clip else {
                continue;
            };
            let clip_data = clip.data()?;
            for bone in 0..data.bones.len() {
                let local = data.bones[bone].value()?.to_matrix();
                data.global_transforms[bone] = match clip_data.parent(bone)? {
                    Some(parent) => data.global_transforms[parent] * local,
                    None => local,
                };
            }
        }
        log::trace!("RigProcessor composed {} rigs", self.table.data.len());
        return Ok(());
    }

    fn priority(&self) -> i32 {
        return RIG_PROCESSOR_PRIORITY;
    }

    fn name(&self) -> &'static str {
        return "RigProcessor";
    }

    fn verify_internal_state(&self) -> Result<(), AnimError> {
        self.core.verify_internal_state()?;
        if self.table.data.len() != self.core.num_indices() {
            return Err(AnimError::Unexcepted);
        }
        for data in &self.table.data {
            if data.bones.len() != data.global_transforms.len() {
                return Err(AnimError::Unexcepted);
            }
        }
        return Ok(());
    }
}

impl IndexedProcessor for RigProcessor {
    type Data = RigTable;

    fn core(&self) -> &ProcessorCore {
        return &self.core;
    }

    fn parts(&mut self) -> (&mut ProcessorCore, &mut RigTable) {
        return (&mut self.core, &mut self.table);
    }
}

impl Motivator<RigProcessor> {
    pub fn blend_to_anim(&self, clip: &Rc<AnimationClip>, playback: &AnimationPlayback) -> Result<(), AnimError> {
        return self.with_indices_mut(|p, r| p.blend_to_anim(r.start, clip, playback))?;
    }

    pub fn global_transforms(&self) -> Result<Vec<Mat4>, AnimError> {
        return self.with_indices(|p, r| p.global_transforms(r.start).map(|m| m.to_vec()))?;
    }

    pub fn current_clip(&self) -> Result<Option<Rc<AnimationClip>>, AnimError> {
        return self.with_indices(|p, r| p.current_clip(r.start))?;
    }

    pub fn num_bones(&self) -> Result<usize, AnimError> {
        return self.with_indices(|p, r| p.num_bones(r.start))?;
    }

    pub fn time_remaining(&self) -> Result<Duration, AnimError> {
        return self.with_indices(|p, r| p.time_remaining(r.start))?;
    }

    pub fn set_playback_rate(&self, playback_rate: f32) -> Result<(), AnimError> {
        return self.with_indices(|p, r| p.set_playback_rate(r.start, playback_rate))?;
    }

    pub fn set_repeating(&self, repeat: bool) -> Result<(), AnimError> {
        return self.with_indices(|p, r| p.set_repeating(r.start, repeat))?;
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};
    use wasm_bindgen_test::*;

    use super::*;
    use crate::animation_clip::{AnimChannel, AnimChannelType, ClipData};
    use crate::base::BONE_NO_PARENT;
    use crate::math::Transform;
    use crate::spline_processor::SplineProcessor;

    const MS: Duration = Duration::from_millis(1);

    struct Fixture {
        splines: Rc<RefCell<SplineProcessor>>,
        transforms: Rc<RefCell<TransformProcessor>>,
        rigs: Rc<RefCell<RigProcessor>>,
    }

    impl Fixture {
        fn new() -> Fixture {
            let splines = Rc::new(RefCell::new(SplineProcessor::new()));
            let transforms = Rc::new(RefCell::new(TransformProcessor::new(splines.clone())));
            let rigs = Rc::new(RefCell::new(RigProcessor::new(transforms.clone())));
            return Fixture {
                splines,
                transforms,
                rigs,
            };
        }

        fn advance(&self, time: Duration) {
            self.splines.borrow_mut().advance_frame(time).unwrap();
            self.transforms.borrow_mut().advance_frame(time).unwrap();
            self.rigs.borrow_mut().advance_frame(time).unwrap();
        }
    }

    fn translate(x: f32, y: f32, z: f32) -> Vec<AnimChannel> {
        return vec![
            AnimChannel::with_constant(AnimChannelType::TranslateX, x),
            AnimChannel::with_constant(AnimChannelType::TranslateY, y),
            AnimChannel::with_constant(AnimChannelType::TranslateZ, z),
        ];
    }

    fn arm_clip() -> Rc<AnimationClip> {
        let q = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let mut shoulder = translate(0.0, 1.0, 0.0);
        shoulder.extend([
            AnimChannel::with_constant(AnimChannelType::QuaternionZ, q.z),
            AnimChannel::with_constant(AnimChannelType::QuaternionW, q.w),
        ]);
        let data = ClipData::new(
            vec!["root".into(), "shoulder".into(), "hand".into(), "prop".into()],
            vec![BONE_NO_PARENT, 0, 1, BONE_NO_PARENT],
            vec![
                translate(1.0, 0.0, 0.0),
                shoulder,
                translate(2.0, 0.0, 0.0),
                vec![AnimChannel::with_constant(AnimChannelType::ScaleX, 3.0)],
            ],
            Duration::from_secs(1),
            false,
        )
        .unwrap();
        return Rc::new(AnimationClip::with_data("arm", data));
    }

    fn local(channels: &[AnimChannel]) -> Mat4 {
        let mut transform = Transform::identity();
        let mut rotation = Quat::IDENTITY.to_array();
        for channel in channels {
            let value = channel.start_value();
            match channel.channel_type {
                AnimChannelType::TranslateX => transform.translation.x = value,
                AnimChannelType::TranslateY => transform.translation.y = value,
                AnimChannelType::TranslateZ => transform.translation.z = value,
                AnimChannelType::QuaternionZ => rotation[2] = value,
                AnimChannelType::QuaternionW => rotation[3] = value,
                AnimChannelType::ScaleX => transform.scale.x = value,
                _ => unreachable!(),
            }
        }
        transform.rotation = Quat::from_array(rotation).normalize();
        return transform.to_matrix();
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_rig_composition() {
        let f = Fixture::new();
        let rig = RigProcessor::allocate(&f.rigs).unwrap();
        let clip = arm_clip();
        rig.blend_to_anim(&clip, &AnimationPlayback::default()).unwrap();
        assert_eq!(rig.num_bones().unwrap(), 4);
        assert!(Rc::ptr_eq(&rig.current_clip().unwrap().unwrap(), &clip));
        f.advance(10 * MS);

        let globals = rig.global_transforms().unwrap();
        let clip_data = clip.data().unwrap();
        for bone in 0..clip_data.num_bones() {
            let local = local(clip_data.channels(bone).unwrap());
            let expected = match clip_data.parent(bone).unwrap() {
                Some(parent) => globals[parent] * local,
                None => local,
            };
            assert!(globals[bone].abs_diff_eq(expected, 1e-5));
        }

        // the hand sits 2 along the rotated x axis of the shoulder
        let hand = globals[2].transform_point3(Vec3::ZERO);
        assert!(hand.abs_diff_eq(Vec3::new(1.0, 3.0, 0.0), 1e-5));
        assert!(globals[3].abs_diff_eq(Mat4::from_scale(Vec3::new(3.0, 1.0, 1.0)), 1e-6));
        assert!(f.rigs.borrow().verify_internal_state().is_ok());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_blend_resizes_bones() {
        let f = Fixture::new();
        let rig = RigProcessor::allocate(&f.rigs).unwrap();
        rig.blend_to_anim(&arm_clip(), &AnimationPlayback::default()).unwrap();
        assert_eq!(f.transforms.borrow().core().num_motivators(), 4);

        let single = ClipData::new(
            vec!["root".into()],
            vec![BONE_NO_PARENT],
            vec![translate(0.0, 0.0, 5.0)],
            Duration::from_millis(200),
            false,
        )
        .unwrap();
        let single = Rc::new(AnimationClip::with_data("single", single));
        let playback = AnimationPlayback {
            blend_time: 200 * MS,
            ..AnimationPlayback::default()
        };
        rig.blend_to_anim(&single, &playback).unwrap();
        assert_eq!(rig.num_bones().unwrap(), 1);
        assert_eq!(f.transforms.borrow().core().num_motivators(), 1);
        assert!(rig.time_remaining().unwrap() > Duration::ZERO);

        f.advance(200 * MS);
        let root = rig.global_transforms().unwrap()[0].transform_point3(Vec3::ZERO);
        assert!(root.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-2));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_clip_not_ready() {
        let f = Fixture::new();
        let rig = RigProcessor::allocate(&f.rigs).unwrap();
        let clip = Rc::new(AnimationClip::new("pending"));
        let err = rig.blend_to_anim(&clip, &AnimationPlayback::default()).unwrap_err();
        assert!(err.is_clip_not_ready());
        assert_eq!(rig.num_bones().unwrap(), 0);
        assert!(rig.current_clip().unwrap().is_none());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_drop_releases_bones() {
        let f = Fixture::new();
        let a = RigProcessor::allocate(&f.rigs).unwrap();
        let b = RigProcessor::allocate(&f.rigs).unwrap();
        a.blend_to_anim(&arm_clip(), &AnimationPlayback::default()).unwrap();
        b.blend_to_anim(&arm_clip(), &AnimationPlayback::default()).unwrap();
        assert_eq!(f.transforms.borrow().core().num_motivators(), 8);

        drop(a);
        assert_eq!(f.transforms.borrow().core().num_motivators(), 4);
        f.advance(MS);
        assert_eq!(f.rigs.borrow().core().num_indices(), 1);
        assert_eq!(b.global_transforms().unwrap().len(), 4);
        assert!(b.clone_motivator().unwrap_err().is_cloning_unsupported());
    }
}
