//!
//! Animation clips: per-bone channel lists plus the bone hierarchy.
//!
//! A clip is created empty, filled from a binary payload by `initialize()`
//! and marked ready by `finalize()`. Clips are shared through `Rc` by every
//! rig playing them.
//!

use bimap::BiHashMap;
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::archive::{Archive, ArchiveRead, ArchiveWrite, ArchiveWriter};
use crate::base::{duration_to_spline_time, AnimError, BONE_NO_PARENT, CLIP_MAX_BONES};
use crate::compact_spline::{CompactSpline, CompactSplineNode};
use crate::math::Interval;

/// Scalar channels of a transform. Ops are applied, and stored, in this order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnimChannelType {
    TranslateX = 0,
    TranslateY = 1,
    TranslateZ = 2,
    QuaternionX = 3,
    QuaternionY = 4,
    QuaternionZ = 5,
    QuaternionW = 6,
    ScaleX = 7,
    ScaleY = 8,
    ScaleZ = 9,
}

impl AnimChannelType {
    pub const ALL: [AnimChannelType; 10] = [
        AnimChannelType::TranslateX,
        AnimChannelType::TranslateY,
        AnimChannelType::TranslateZ,
        AnimChannelType::QuaternionX,
        AnimChannelType::QuaternionY,
        AnimChannelType::QuaternionZ,
        AnimChannelType::QuaternionW,
        AnimChannelType::ScaleX,
        AnimChannelType::ScaleY,
        AnimChannelType::ScaleZ,
    ];

    #[inline]
    pub fn from_u8(value: u8) -> Option<AnimChannelType> {
        return AnimChannelType::ALL.get(value as usize).copied();
    }

    /// Value of the channel in the identity transform.
    #[inline]
    pub fn default_value(self) -> f32 {
        return match self {
            AnimChannelType::QuaternionW | AnimChannelType::ScaleX | AnimChannelType::ScaleY | AnimChannelType::ScaleZ => {
                1.0
            }
            _ => 0.0,
        };
    }

    #[inline]
    pub fn is_quaternion(self) -> bool {
        return AnimChannelType::QuaternionX <= self && self <= AnimChannelType::QuaternionW;
    }
}

///
/// One channel of a bone: a constant, a spline, or neither (the channel's
/// default value).
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimChannel {
    pub channel_type: AnimChannelType,
    pub const_value: Option<f32>,
    pub spline: Option<Rc<CompactSpline>>,
}

impl AnimChannel {
    pub fn with_default(channel_type: AnimChannelType) -> AnimChannel {
        return AnimChannel {
            channel_type,
            const_value: None,
            spline: None,
        };
    }

    pub fn with_constant(channel_type: AnimChannelType, value: f32) -> AnimChannel {
        return AnimChannel {
            channel_type,
            const_value: Some(value),
            spline: None,
        };
    }

    pub fn with_spline(channel_type: AnimChannelType, spline: Rc<CompactSpline>) -> AnimChannel {
        return AnimChannel {
            channel_type,
            const_value: None,
            spline: Some(spline),
        };
    }

    /// Value at the start of the channel.
    pub fn start_value(&self) -> f32 {
        if let Some(spline) = &self.spline {
            return spline.start_y();
        }
        return self.const_value.unwrap_or_else(|| self.channel_type.default_value());
    }
}

const CHANNEL_DEFAULT: u8 = 0;
const CHANNEL_CONSTANT: u8 = 1;
const CHANNEL_SPLINE: u8 = 2;

///
/// Parsed content of a clip. Bones are ordered so that every parent comes
/// before its children.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClipData {
    bone_names: BiHashMap<String, usize>,
    parents: Vec<i16>,
    channels: Vec<Vec<AnimChannel>>,
    duration: Duration,
    repeat: bool,
}

impl ClipData {
    /// Builds clip content. Bone `i` is named `names[i]`, has parent
    /// `parents[i]` and plays `channels[i]`.
    pub fn new(
        names: Vec<String>,
        parents: Vec<i16>,
        channels: Vec<Vec<AnimChannel>>,
        duration: Duration,
        repeat: bool,
    ) -> Result<ClipData, AnimError> {
        if names.len() != parents.len() || names.len() != channels.len() {
            return Err(AnimError::InvalidClip("bone arrays differ in length"));
        }
        if names.len() > CLIP_MAX_BONES {
            return Err(AnimError::InvalidClip("too many bones"));
        }

        for (bone, &parent) in parents.iter().enumerate() {
            if parent < BONE_NO_PARENT || (parent >= 0 && parent as usize >= bone) {
                return Err(AnimError::InvalidParent {
                    bone,
                    parent: parent as i32,
                });
            }
        }

        for bone_channels in &channels {
            let ascending = bone_channels
                .windows(2)
                .all(|w| w[0].channel_type < w[1].channel_type);
            if !ascending {
                return Err(AnimError::InvalidClip("channels not in ascending order"));
            }
        }

        let mut bone_names = BiHashMap::with_capacity(names.len());
        for (idx, name) in names.into_iter().enumerate() {
            if bone_names.insert_no_overwrite(name, idx).is_err() {
                return Err(AnimError::InvalidClip("duplicated bone name"));
            }
        }

        return Ok(ClipData {
            bone_names,
            parents,
            channels,
            duration,
            repeat,
        });
    }

    /// Reads the clip content that follows an archive header.
    pub fn from_archive(archive: &mut Archive<impl Read>) -> Result<ClipData, AnimError> {
        if archive.tag() != AnimationClip::tag() {
            return Err(AnimError::InvalidTag);
        }
        if archive.version() != AnimationClip::version() {
            return Err(AnimError::InvalidVersion);
        }

        let duration_ms: f32 = archive.read()?;
        if !(duration_ms >= 0.0) || !duration_ms.is_finite() {
            return Err(AnimError::InvalidClip("bad duration"));
        }
        let repeat: bool = archive.read()?;
        let num_bones = archive.read::<u32>()? as usize;
        if num_bones > CLIP_MAX_BONES {
            return Err(AnimError::InvalidClip("too many bones"));
        }

        let mut names = Vec::with_capacity(num_bones);
        let mut parents = Vec::with_capacity(num_bones);
        let mut channels = Vec::with_capacity(num_bones);
        for _ in 0..num_bones {
            names.push(archive.read::<String>()?);
            parents.push(archive.read::<i16>()?);
            let num_channels = archive.read::<u32>()? as usize;
            if num_channels > AnimChannelType::ALL.len() {
                return Err(AnimError::InvalidClip("too many channels"));
            }
            channels.push(archive.read_vec::<AnimChannel>(num_channels)?);
        }

        if !archive.is_exhausted()? {
            return Err(AnimError::InvalidClip("trailing bytes"));
        }

        let duration = Duration::try_from_secs_f64(duration_ms as f64 / 1000.0)
            .map_err(|_| AnimError::InvalidClip("bad duration"))?;
        return ClipData::new(names, parents, channels, duration, repeat);
    }

    #[inline]
    pub fn num_bones(&self) -> usize {
        return self.parents.len();
    }

    #[inline]
    pub fn bone_names(&self) -> &BiHashMap<String, usize> {
        return &self.bone_names;
    }

    #[inline]
    pub fn bone_by_name(&self, name: &str) -> Option<usize> {
        return self.bone_names.get_by_left(name).copied();
    }

    #[inline]
    pub fn bone_name(&self, bone: usize) -> Option<&str> {
        return self.bone_names.get_by_right(&bone).map(|s| s.as_str());
    }

    /// Parent of every bone, `BONE_NO_PARENT` for roots.
    #[inline]
    pub fn parents(&self) -> &[i16] {
        return &self.parents;
    }

    pub fn parent(&self, bone: usize) -> Result<Option<usize>, AnimError> {
        let parent = *self.parents.get(bone).ok_or(AnimError::InvalidBone(bone))?;
        return Ok(if parent < 0 { None } else { Some(parent as usize) });
    }

    /// Channels of `bone`, sorted by channel type.
    pub fn channels(&self, bone: usize) -> Result<&[AnimChannel], AnimError> {
        return self
            .channels
            .get(bone)
            .map(|c| c.as_slice())
            .ok_or(AnimError::InvalidBone(bone));
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        return self.duration;
    }

    #[inline]
    pub fn repeat(&self) -> bool {
        return self.repeat;
    }
}

impl ArchiveRead<AnimChannel> for AnimChannel {
    fn read<R: Read>(archive: &mut Archive<R>) -> Result<AnimChannel, AnimError> {
        let channel_type = AnimChannelType::from_u8(archive.read::<u8>()?)
            .ok_or(AnimError::InvalidClip("unknown channel type"))?;
        return match archive.read::<u8>()? {
            CHANNEL_DEFAULT => Ok(AnimChannel::with_default(channel_type)),
            CHANNEL_CONSTANT => Ok(AnimChannel::with_constant(channel_type, archive.read()?)),
            CHANNEL_SPLINE => {
                let spline = archive.read::<CompactSpline>()?;
                Ok(AnimChannel::with_spline(channel_type, Rc::new(spline)))
            }
            _ => Err(AnimError::InvalidClip("unknown channel kind")),
        };
    }
}

impl ArchiveRead<CompactSpline> for CompactSpline {
    fn read<R: Read>(archive: &mut Archive<R>) -> Result<CompactSpline, AnimError> {
        let y_min: f32 = archive.read()?;
        let y_max: f32 = archive.read()?;
        let x_granularity: f32 = archive.read()?;
        if !(y_min <= y_max) || !(x_granularity > 0.0) {
            return Err(AnimError::InvalidClip("bad spline quantization"));
        }

        let num_nodes = archive.read::<u32>()?;
        if num_nodes > u16::MAX as u32 {
            return Err(AnimError::InvalidClip("too many spline nodes"));
        }
        let nodes = archive.read_vec::<CompactSplineNode>(num_nodes as usize)?;
        if nodes.windows(2).any(|w| w[1].raw_x() < w[0].raw_x()) {
            return Err(AnimError::InvalidClip("spline nodes out of order"));
        }

        let y_range = Interval::new(y_min, y_max);
        return Ok(CompactSpline::from_raw(y_range, x_granularity, &nodes, num_nodes as u16));
    }
}

impl ArchiveRead<CompactSplineNode> for CompactSplineNode {
    #[inline]
    fn read<R: Read>(archive: &mut Archive<R>) -> Result<CompactSplineNode, AnimError> {
        let x: u16 = archive.read()?;
        let y: u16 = archive.read()?;
        let angle: i16 = archive.read()?;
        return Ok(CompactSplineNode::from_raw(x, y, angle));
    }
}

impl ArchiveWrite for ClipData {
    fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError> {
        archive.write(&duration_to_spline_time(self.duration))?;
        archive.write(&self.repeat)?;
        archive.write(&(self.num_bones() as u32))?;
        for bone in 0..self.num_bones() {
            archive.write(self.bone_name(bone).unwrap_or_default())?;
            archive.write(&self.parents[bone])?;
            archive.write(&(self.channels[bone].len() as u32))?;
            for channel in &self.channels[bone] {
                archive.write(channel)?;
            }
        }
        return Ok(());
    }
}

impl ArchiveWrite for AnimChannel {
    fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError> {
        archive.write(&(self.channel_type as u8))?;
        if let Some(spline) = &self.spline {
            archive.write(&CHANNEL_SPLINE)?;
            return archive.write(&**spline);
        }
        if let Some(value) = self.const_value {
            archive.write(&CHANNEL_CONSTANT)?;
            return archive.write(&value);
        }
        return archive.write(&CHANNEL_DEFAULT);
    }
}

impl ArchiveWrite for CompactSpline {
    fn write<W: Write>(&self, archive: &mut ArchiveWriter<W>) -> Result<(), AnimError> {
        archive.write(&self.y_range().min)?;
        archive.write(&self.y_range().max)?;
        archive.write(&self.x_granularity())?;
        archive.write(&(self.nodes().len() as u32))?;
        for node in self.nodes() {
            archive.write(&node.raw_x())?;
            archive.write(&node.raw_y())?;
            archive.write(&node.raw_angle())?;
        }
        return Ok(());
    }
}

///
/// A shared, asynchronously loaded animation clip.
///
/// The clip starts empty. The asset loader parses the payload with
/// `initialize()` and then calls `finalize()`, which marks the clip ready
/// and runs the `on_ready` callbacks. A clip whose payload fails to parse
/// never becomes ready.
///
pub struct AnimationClip {
    uri: String,
    data: OnceCell<ClipData>,
    ready: Cell<bool>,
    ready_callbacks: RefCell<Vec<Box<dyn FnOnce(&AnimationClip)>>>,
}

impl fmt::Debug for AnimationClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("AnimationClip")
            .field("uri", &self.uri)
            .field("ready", &self.ready.get())
            .field("data", &self.data.get())
            .finish();
    }
}

impl AnimationClip {
    /// `AnimationClip` resource file tag for `Archive`.
    #[inline]
    pub fn tag() -> &'static str {
        return "motive-anim-clip";
    }

    /// `AnimationClip` resource file version for `Archive`.
    #[inline]
    pub fn version() -> u32 {
        return 1;
    }

    /// An empty clip, waiting for its payload.
    pub fn new(uri: impl Into<String>) -> AnimationClip {
        return AnimationClip {
            uri: uri.into(),
            data: OnceCell::new(),
            ready: Cell::new(false),
            ready_callbacks: RefCell::new(Vec::new()),
        };
    }

    /// A clip that is ready from the start.
    pub fn with_data(uri: impl Into<String>, data: ClipData) -> AnimationClip {
        let clip = AnimationClip::new(uri);
        let _ = clip.data.set(data);
        clip.ready.set(true);
        return clip;
    }

    /// Reads a ready `AnimationClip` from an archive.
    pub fn from_archive(archive: &mut Archive<impl Read>) -> Result<AnimationClip, AnimError> {
        let data = ClipData::from_archive(archive)?;
        return Ok(AnimationClip::with_data("", data));
    }

    /// Reads a ready `AnimationClip` from a memory buffer.
    pub fn from_slice(buf: &[u8]) -> Result<AnimationClip, AnimError> {
        let mut archive = Archive::from_slice(buf)?;
        return AnimationClip::from_archive(&mut archive);
    }

    /// Reads a ready `AnimationClip` from a file.
    #[cfg(not(feature = "wasm"))]
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<AnimationClip, AnimError> {
        let mut archive = Archive::from_path(path.as_ref())?;
        let data = ClipData::from_archive(&mut archive)?;
        return Ok(AnimationClip::with_data(path.as_ref().to_string_lossy(), data));
    }

    /// Writes `data` as a complete clip payload, header included.
    pub fn to_bytes(data: &ClipData) -> Result<Vec<u8>, AnimError> {
        let mut archive = ArchiveWriter::to_vec(AnimationClip::tag(), AnimationClip::version())?;
        archive.write(data)?;
        return Ok(archive.into_inner());
    }

    #[inline]
    pub fn uri(&self) -> &str {
        return &self.uri;
    }

    /// Parses a clip payload. A clip is initialized at most once.
    pub fn initialize(&self, bytes: &[u8]) -> Result<(), AnimError> {
        if self.data.get().is_some() {
            return Err(AnimError::Unexcepted);
        }
        let mut archive = Archive::from_slice(bytes)?;
        let data = ClipData::from_archive(&mut archive)?;
        log::debug!("Initialized clip '{}' with {} bones", self.uri, data.num_bones());
        let _ = self.data.set(data);
        return Ok(());
    }

    /// Marks the clip ready and runs the pending callbacks. Does nothing if
    /// the clip was never initialized.
    pub fn finalize(&self) {
        if self.data.get().is_none() {
            log::warn!("Clip '{}' finalized without content, it will never be ready", self.uri);
            return;
        }
        if self.ready.replace(true) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.ready_callbacks.borrow_mut());
        for callback in callbacks {
            callback(self);
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        return self.ready.get();
    }

    /// Runs `callback` once the clip is ready, or now if it already is.
    pub fn on_ready(&self, callback: impl FnOnce(&AnimationClip) + 'static) {
        if self.is_ready() {
            callback(self);
        } else {
            self.ready_callbacks.borrow_mut().push(Box::new(callback));
        }
    }

    /// Content of a ready clip.
    pub fn data(&self) -> Result<&ClipData, AnimError> {
        if !self.is_ready() {
            return Err(AnimError::ClipNotReady);
        }
        return self.data.get().ok_or(AnimError::ClipNotReady);
    }
}
