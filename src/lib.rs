mod animation_clip;
mod animation_engine;
mod archive;
mod base;
mod bulk_spline_evaluator;
mod compact_spline;
mod cubic_curve;
mod dual_cubic;
mod endian;
mod index_allocator;
mod math;
mod motivator;
mod processor;
mod quadratic_curve;
mod rig_processor;
mod spline_processor;
mod transform_processor;

pub mod test_utils;

pub use animation_clip::{AnimChannel, AnimChannelType, AnimationClip, ClipData};
pub use animation_engine::{AnimationEngine, AssetLoader};
pub use archive::{Archive, ArchiveRead, ArchiveWrite, ArchiveWriter};
pub use base::*;
pub use bulk_spline_evaluator::{default_strategy, BulkSplineEvaluator, EvaluatorStrategy, LaneStrategy, ScalarStrategy, SplinePlayback};
pub use compact_spline::{
    outside_spline, CompactSpline, CompactSplineIndex, CompactSplineNode, SplineAddMethod, UncompressedNode,
    AFTER_SPLINE_INDEX, BEFORE_SPLINE_INDEX, DEFAULT_MAX_NODES, INVALID_SPLINE_INDEX,
};
pub use cubic_curve::{CubicCurve, CubicInit};
pub use dual_cubic::dual_cubic_mid_node;
pub use index_allocator::{IndexAllocator, IndexAllocatorCallbacks};
pub use math::{clamp, clamp_near_zero, lerp, Interval, Transform};
pub use motivator::Motivator;
pub use processor::{allocate_motivator, AnimProcessor, IndexedData, IndexedProcessor, MotivatorId, ProcessorCore};
pub use quadratic_curve::QuadraticCurve;
pub use rig_processor::{RigMotivator, RigProcessor, RigTable};
pub use spline_processor::{AnimationPlayback, SplineData, SplineMotivator, SplineProcessor};
pub use transform_processor::{TransformMotivator, TransformProcessor, TransformTable};
