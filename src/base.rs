//!
//! Base types, constants and utils.
//!

use std::collections::hash_map::DefaultHasher;
use std::hash::BuildHasher;
use std::time::Duration;
use thiserror::Error;

/// Motive error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimError {
    /// The handle was never bound to a processor, or has been taken from.
    #[error("Invalid motivator")]
    InvalidMotivator,
    /// The handle's generation no longer matches the processor slot.
    #[error("Stale motivator")]
    StaleMotivator,
    /// The processor that owned the handle has been dropped.
    #[error("Processor gone")]
    ProcessorGone,
    /// Index out of the processor's storage.
    #[error("Invalid index")]
    InvalidIndex,
    /// Number of values passed doesn't match the motivator's dimensions.
    #[error("Dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// `acquire_motivator()` for a motivator type that was never registered.
    #[error("Unregistered motivator: {0}")]
    UnregisteredMotivator(&'static str),
    /// The processor can't duplicate its per-index state.
    #[error("Cloning unsupported")]
    CloningUnsupported,

    /// Bone index out of the rig.
    #[error("Invalid bone: {0}")]
    InvalidBone(usize),
    /// Bone parent table violates `parent[i] < i`.
    #[error("Invalid parent: bone {bone}, parent {parent}")]
    InvalidParent { bone: usize, parent: i32 },
    /// The clip hasn't been finalized yet.
    #[error("Clip not ready")]
    ClipNotReady,

    /// Std io errors.
    #[error("IO error: {0}")]
    IO(std::io::ErrorKind),
    /// Std string errors.
    #[error("Utf8 error: valid_up_to {0}")]
    Utf8(u32),

    /// Read archive tag error.
    #[error("Invalid tag")]
    InvalidTag,
    /// Read archive version error.
    #[error("Invalid version")]
    InvalidVersion,
    /// Structurally broken clip payload.
    #[error("Invalid clip: {0}")]
    InvalidClip(&'static str),

    /// Unexcepted error.
    #[error("Unexcepted error")]
    Unexcepted,
}

impl From<std::io::Error> for AnimError {
    fn from(err: std::io::Error) -> Self {
        AnimError::IO(err.kind())
    }
}

impl From<std::str::Utf8Error> for AnimError {
    fn from(err: std::str::Utf8Error) -> Self {
        AnimError::Utf8(err.valid_up_to() as u32)
    }
}

impl AnimError {
    pub fn is_invalid_motivator(&self) -> bool {
        matches!(self, AnimError::InvalidMotivator)
    }

    pub fn is_stale_motivator(&self) -> bool {
        matches!(self, AnimError::StaleMotivator)
    }

    pub fn is_processor_gone(&self) -> bool {
        matches!(self, AnimError::ProcessorGone)
    }

    pub fn is_invalid_index(&self) -> bool {
        matches!(self, AnimError::InvalidIndex)
    }

    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, AnimError::DimensionMismatch { .. })
    }

    pub fn is_unregistered_motivator(&self) -> bool {
        matches!(self, AnimError::UnregisteredMotivator(_))
    }

    pub fn is_cloning_unsupported(&self) -> bool {
        matches!(self, AnimError::CloningUnsupported)
    }

    pub fn is_invalid_bone(&self) -> bool {
        matches!(self, AnimError::InvalidBone(_))
    }

    pub fn is_invalid_parent(&self) -> bool {
        matches!(self, AnimError::InvalidParent { .. })
    }

    pub fn is_clip_not_ready(&self) -> bool {
        matches!(self, AnimError::ClipNotReady)
    }

    pub fn is_io(&self) -> bool {
        matches!(self, AnimError::IO(_))
    }

    pub fn is_utf8(&self) -> bool {
        matches!(self, AnimError::Utf8(_))
    }

    pub fn is_invalid_tag(&self) -> bool {
        matches!(self, AnimError::InvalidTag)
    }

    pub fn is_invalid_version(&self) -> bool {
        matches!(self, AnimError::InvalidVersion)
    }

    pub fn is_invalid_clip(&self) -> bool {
        matches!(self, AnimError::InvalidClip(_))
    }

    pub fn is_unexcepted(&self) -> bool {
        matches!(self, AnimError::Unexcepted)
    }
}

/// Parent index of a root bone.
pub const BONE_NO_PARENT: i16 = -1;

/// Defines the maximum number of bones in a clip.
/// Bone parents are stored as `i16`, which bounds the hierarchy size.
pub const CLIP_MAX_BONES: usize = i16::MAX as usize;

/// Processors are advanced in ascending priority order.
pub const SPLINE_PROCESSOR_PRIORITY: i32 = 1;
pub const TRANSFORM_PROCESSOR_PRIORITY: i32 = 2;
pub const RIG_PROCESSOR_PRIORITY: i32 = 3;

/// A hasher builder that creates `DefaultHasher` with default keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicState;

impl DeterministicState {
    /// Creates a new `DeterministicState` that builds `DefaultHasher` with default keys.
    pub const fn new() -> DeterministicState {
        DeterministicState
    }
}

impl BuildHasher for DeterministicState {
    type Hasher = DefaultHasher;

    fn build_hasher(&self) -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// Spline x axis is measured in milliseconds.
#[inline]
pub fn duration_to_spline_time(duration: Duration) -> f32 {
    return (duration.as_secs_f64() * 1000.0) as f32;
}

/// Converts spline x back to a duration, negative times clamp to zero.
#[inline]
pub fn spline_time_to_duration(time: f32) -> Duration {
    if !(time > 0.0) {
        return Duration::ZERO;
    }
    return Duration::try_from_secs_f64(time as f64 / 1000.0).unwrap_or(Duration::MAX);
}
