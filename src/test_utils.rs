//!
//! Helpers for tests and tools: building clips in code and serving them
//! from memory.
//!

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::animation_clip::{AnimChannel, AnimationClip, ClipData};
use crate::animation_engine::AssetLoader;
use crate::base::{duration_to_spline_time, AnimError, DeterministicState, BONE_NO_PARENT};
use crate::compact_spline::{CompactSpline, SplineAddMethod};
use crate::math::Interval;

/// A spline going linearly from `from` to `to` over `duration`.
pub fn linear_spline(from: f32, to: f32, duration: Duration) -> Rc<CompactSpline> {
    let length = duration_to_spline_time(duration);
    let slope = if length > 0.0 { (to - from) / length } else { 0.0 };
    let y_range = Interval::new(from.min(to), from.max(to));
    let mut spline = CompactSpline::with_range(y_range, CompactSpline::recommend_x_granularity(length), 2);
    spline.add_node(0.0, from, slope, SplineAddMethod::AddWithoutModification);
    spline.add_node(length, to, slope, SplineAddMethod::AddWithoutModification);
    return Rc::new(spline);
}

/// Builds `ClipData` bone by bone.
#[derive(Debug, Clone, Default)]
pub struct ClipBuilder {
    names: Vec<String>,
    parents: Vec<i16>,
    channels: Vec<Vec<AnimChannel>>,
    duration: Duration,
    repeat: bool,
}

impl ClipBuilder {
    pub fn new() -> ClipBuilder {
        return ClipBuilder::default();
    }

    /// Appends a bone. Channels are sorted by type.
    pub fn bone(mut self, name: &str, parent: Option<usize>, mut channels: Vec<AnimChannel>) -> ClipBuilder {
        channels.sort_by_key(|c| c.channel_type);
        self.names.push(name.to_string());
        self.parents
            .push(parent.map_or(BONE_NO_PARENT, |p| p.min(i16::MAX as usize) as i16));
        self.channels.push(channels);
        return self;
    }

    pub fn duration(mut self, duration: Duration) -> ClipBuilder {
        self.duration = duration;
        return self;
    }

    pub fn repeat(mut self, repeat: bool) -> ClipBuilder {
        self.repeat = repeat;
        return self;
    }

    pub fn build(self) -> Result<ClipData, AnimError> {
        return ClipData::new(self.names, self.parents, self.channels, self.duration, self.repeat);
    }

    /// A ready clip.
    pub fn build_clip(self, uri: &str) -> Result<Rc<AnimationClip>, AnimError> {
        return Ok(Rc::new(AnimationClip::with_data(uri, self.build()?)));
    }

    /// The clip as a binary payload.
    pub fn to_bytes(self) -> Result<Vec<u8>, AnimError> {
        return AnimationClip::to_bytes(&self.build()?);
    }
}

struct PendingLoad {
    uri: String,
    on_load: Box<dyn FnOnce(&[u8])>,
    on_finalize: Box<dyn FnOnce()>,
}

///
/// An `AssetLoader` serving payloads from memory.
///
/// An immediate loader completes loads inside `load_async`. A deferred one
/// queues them until `flush()`, like a loader waiting on IO.
///
#[derive(Default)]
pub struct MemoryAssetLoader {
    assets: RefCell<HashMap<String, Vec<u8>, DeterministicState>>,
    pending: RefCell<Vec<PendingLoad>>,
    deferred: bool,
}

impl MemoryAssetLoader {
    pub fn new() -> MemoryAssetLoader {
        return MemoryAssetLoader::default();
    }

    pub fn deferred() -> MemoryAssetLoader {
        return MemoryAssetLoader {
            deferred: true,
            ..MemoryAssetLoader::default()
        };
    }

    pub fn insert(&self, uri: &str, bytes: Vec<u8>) {
        self.assets.borrow_mut().insert(uri.to_string(), bytes);
    }

    #[inline]
    pub fn num_pending(&self) -> usize {
        return self.pending.borrow().len();
    }

    /// Completes every queued load. Returns the number of loads completed.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let count = pending.len();
        for load in pending {
            self.complete(load);
        }
        return count;
    }

    fn complete(&self, load: PendingLoad) {
        let bytes = self.assets.borrow().get(&load.uri).cloned();
        match bytes {
            Some(bytes) => (load.on_load)(&bytes),
            None => log::warn!("No asset at '{}'", load.uri),
        }
        (load.on_finalize)();
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn load_async(&self, uri: &str, on_load: Box<dyn FnOnce(&[u8])>, on_finalize: Box<dyn FnOnce()>) {
        let load = PendingLoad {
            uri: uri.to_string(),
            on_load,
            on_finalize,
        };
        if self.deferred {
            self.pending.borrow_mut().push(load);
        } else {
            self.complete(load);
        }
    }
}
