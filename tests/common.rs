#![allow(unused_imports)]
#![allow(dead_code)]

use glam::{Mat4, Quat, Vec3};
use motive_anim::*;
use std::rc::Rc;
use std::time::Duration;

pub const MS: Duration = Duration::from_millis(1);
pub const FRAME: Duration = Duration::from_millis(16);

pub fn assert_near(actual: f32, expected: f32, diff: f32, what: &str) {
    assert!(
        (actual - expected).abs() <= diff,
        "{}: actual {} expected {} (diff {})",
        what,
        actual,
        expected,
        diff
    );
}

pub fn assert_mat_near(actual: &Mat4, expected: &Mat4, diff: f32, what: &str) {
    if !actual.abs_diff_eq(*expected, diff) {
        println!("actual: {:?}", actual);
        println!("expected: {:?}", expected);
        panic!("{}", what);
    }
}

/// Runs `frames` frames of `delta` on the engine.
pub fn run_frames(engine: &mut AnimationEngine, frames: usize, delta: Duration) {
    for _ in 0..frames {
        engine.advance_frame(delta).unwrap();
    }
}

/// An s-shaped spline with a bump in the middle.
pub fn wave_nodes() -> Vec<UncompressedNode> {
    return vec![
        UncompressedNode::new(0.0, 0.0, 0.0),
        UncompressedNode::new(100.0, 2.0, 0.01),
        UncompressedNode::new(250.0, -1.0, -0.02),
        UncompressedNode::new(400.0, 0.5, 0.0),
    ];
}

pub fn translate_channels(x: f32, y: f32, z: f32) -> Vec<AnimChannel> {
    return vec![
        AnimChannel::with_constant(AnimChannelType::TranslateX, x),
        AnimChannel::with_constant(AnimChannelType::TranslateY, y),
        AnimChannel::with_constant(AnimChannelType::TranslateZ, z),
    ];
}

pub fn rotate_channels(rotation: Quat) -> Vec<AnimChannel> {
    return vec![
        AnimChannel::with_constant(AnimChannelType::QuaternionX, rotation.x),
        AnimChannel::with_constant(AnimChannelType::QuaternionY, rotation.y),
        AnimChannel::with_constant(AnimChannelType::QuaternionZ, rotation.z),
        AnimChannel::with_constant(AnimChannelType::QuaternionW, rotation.w),
    ];
}

/// Local matrix of a bone whose channels are all constants.
pub fn constant_local(channels: &[AnimChannel]) -> Mat4 {
    let mut translation = Vec3::ZERO;
    let mut rotation = Quat::IDENTITY.to_array();
    let mut scale = Vec3::ONE;
    for channel in channels {
        let value = channel.start_value();
        match channel.channel_type {
            AnimChannelType::TranslateX => translation.x = value,
            AnimChannelType::TranslateY => translation.y = value,
            AnimChannelType::TranslateZ => translation.z = value,
            AnimChannelType::QuaternionX => rotation[0] = value,
            AnimChannelType::QuaternionY => rotation[1] = value,
            AnimChannelType::QuaternionZ => rotation[2] = value,
            AnimChannelType::QuaternionW => rotation[3] = value,
            AnimChannelType::ScaleX => scale.x = value,
            AnimChannelType::ScaleY => scale.y = value,
            AnimChannelType::ScaleZ => scale.z = value,
        }
    }
    let rotation = Quat::from_array(rotation).normalize();
    return Mat4::from_scale_rotation_translation(scale, rotation, translation);
}
