//!
//! Shared machinery of every processor.
//!
//! A processor owns the per-index state of one kind of motivator. Its data
//! lives in dense arrays managed by an `IndexAllocator`. Each motivator owns
//! a contiguous run of indices (its dimensions).
//!
//! Handles don't store indices directly: they store a `MotivatorId` that names
//! a slot in the processor. The slot holds the current index, so indices can
//! be moved by defragmentation without touching any handle. Each slot carries
//! a generation, bumped whenever the slot changes hands, so that an old id
//! is detected instead of silently reading someone else's data.
//!

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;
use std::time::Duration;

use crate::base::AnimError;
use crate::index_allocator::{IndexAllocator, IndexAllocatorCallbacks};
use crate::motivator::Motivator;

/// Generation-tagged reference to a processor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MotivatorId {
    slot: u32,
    generation: u32,
}

impl MotivatorId {
    #[inline]
    pub fn slot(&self) -> u32 {
        return self.slot;
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        return self.generation;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MotivatorSlot {
    generation: u32,
    index: Option<usize>,
}

///
/// Per-index hooks of a concrete processor.
///
/// All arrays of the processor are indexed the same way; these hooks keep
/// them consistent when the allocator grows, packs or frees indices.
///
pub trait IndexedData {
    /// Resize every per-index array.
    fn set_num_indices(&mut self, num_indices: usize);

    /// Move `count` indices from `old_index` to `new_index`.
    /// Regions may overlap, with `new_index < old_index`.
    fn move_indices(&mut self, old_index: usize, new_index: usize, count: usize);

    /// Return the indices to their initial state, releasing what they own.
    fn reset_indices(&mut self, index: usize, count: usize);

    fn supports_cloning(&self) -> bool {
        return false;
    }

    /// Duplicate `count` indices from `src` into the freshly allocated `dst`.
    fn clone_indices(&mut self, _dst: usize, _src: usize, _count: usize) -> Result<(), AnimError> {
        return Err(AnimError::CloningUnsupported);
    }
}

struct CoreCallbacks<'t> {
    motivators: &'t mut Vec<Option<MotivatorId>>,
    slots: &'t mut [MotivatorSlot],
    data: &'t mut dyn IndexedData,
}

impl<'t> IndexAllocatorCallbacks for CoreCallbacks<'t> {
    fn set_num_indices(&mut self, num_indices: usize) {
        self.motivators.resize(num_indices, None);
        self.data.set_num_indices(num_indices);
    }

    fn move_index_range(&mut self, source: Range<usize>, target: usize) {
        let ids = self.motivators[source.clone()].to_vec();
        for (offset, id) in ids.iter().enumerate() {
            let starts_motivator = offset == 0 || ids[offset - 1] != *id;
            if let (true, Some(id)) = (starts_motivator, id) {
                if let Some(slot) = self.slots.get_mut(id.slot as usize) {
                    slot.index = Some(target + offset);
                }
            }
        }

        let target_end = target + source.len();
        self.motivators[target..target_end].copy_from_slice(&ids);
        for i in source.start.max(target_end)..source.end {
            self.motivators[i] = None;
        }
        self.data.move_indices(source.start, target, source.len());
    }
}

///
/// Bookkeeping shared by all processors: index allocation, the
/// index -> motivator back-references and the slot table behind handles.
///
#[derive(Debug, Default)]
pub struct ProcessorCore {
    allocator: IndexAllocator,
    motivators: Vec<Option<MotivatorId>>,
    slots: Vec<MotivatorSlot>,
    free_slots: Vec<u32>,
}

impl ProcessorCore {
    pub fn new() -> ProcessorCore {
        return ProcessorCore::default();
    }

    /// Allocates `dimensions` contiguous indices and a slot pointing at them.
    pub fn allocate(&mut self, data: &mut dyn IndexedData, dimensions: usize) -> MotivatorId {
        let dimensions = dimensions.max(1);
        let index = self.allocator.alloc(
            dimensions,
            &mut CoreCallbacks {
                motivators: &mut self.motivators,
                slots: &mut self.slots,
                data,
            },
        );

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(MotivatorSlot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        entry.index = Some(index);
        let id = MotivatorId {
            slot,
            generation: entry.generation,
        };
        for m in &mut self.motivators[index..index + dimensions] {
            *m = Some(id);
        }
        // Reused indices may still hold a moved or removed motivator's state.
        data.reset_indices(index, dimensions);
        return id;
    }

    /// First index of the motivator.
    pub fn index(&self, id: MotivatorId) -> Result<usize, AnimError> {
        let slot = self.slots.get(id.slot as usize).ok_or(AnimError::InvalidMotivator)?;
        if slot.generation != id.generation {
            return Err(AnimError::StaleMotivator);
        }
        return slot.index.ok_or(AnimError::StaleMotivator);
    }

    /// Index range of the motivator.
    pub fn indices(&self, id: MotivatorId) -> Result<Range<usize>, AnimError> {
        let index = self.index(id)?;
        return Ok(index..index + self.allocator.count_for_index(index));
    }

    #[inline]
    pub fn dimensions(&self, id: MotivatorId) -> Result<usize, AnimError> {
        return Ok(self.indices(id)?.len());
    }

    #[inline]
    pub fn is_valid(&self, id: MotivatorId) -> bool {
        return self.index(id).is_ok();
    }

    /// Motivator that owns `index`, if any.
    #[inline]
    pub fn motivator_at(&self, index: usize) -> Option<MotivatorId> {
        return self.motivators.get(index).copied().flatten();
    }

    /// Resets and frees the motivator's indices. Its id becomes stale.
    pub fn remove(&mut self, data: &mut dyn IndexedData, id: MotivatorId) -> Result<(), AnimError> {
        let range = self.indices(id)?;
        data.reset_indices(range.start, range.len());
        for m in &mut self.motivators[range.clone()] {
            *m = None;
        }
        self.allocator.free(range.start)?;

        let slot = &mut self.slots[id.slot as usize];
        slot.index = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.slot);
        return Ok(());
    }

    /// Rebinds the motivator's indices to a new id. The old id becomes stale.
    pub fn transfer(&mut self, id: MotivatorId) -> Result<MotivatorId, AnimError> {
        let range = self.indices(id)?;
        let slot = &mut self.slots[id.slot as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let new_id = MotivatorId {
            slot: id.slot,
            generation: slot.generation,
        };
        for m in &mut self.motivators[range] {
            *m = Some(new_id);
        }
        return Ok(new_id);
    }

    /// Allocates a new motivator holding a copy of `id`'s state.
    pub fn clone_motivator(&mut self, data: &mut dyn IndexedData, id: MotivatorId) -> Result<MotivatorId, AnimError> {
        if !data.supports_cloning() {
            return Err(AnimError::CloningUnsupported);
        }
        let range = self.indices(id)?;
        let new_id = self.allocate(data, range.len());
        let dst = self.index(new_id)?;
        data.clone_indices(dst, range.start, range.len())?;
        return Ok(new_id);
    }

    /// Packs live indices at the low end. Handles stay valid.
    pub fn defragment(&mut self, data: &mut dyn IndexedData) {
        if self.allocator.num_unused_indices() == 0 {
            return;
        }
        let before = self.allocator.num_indices();
        self.allocator.defragment(&mut CoreCallbacks {
            motivators: &mut self.motivators,
            slots: &mut self.slots,
            data,
        });
        log::debug!("Defragmented processor: {} -> {} indices", before, self.allocator.num_indices());
    }

    #[inline]
    pub fn num_indices(&self) -> usize {
        return self.allocator.num_indices();
    }

    /// Number of live motivators.
    pub fn num_motivators(&self) -> usize {
        return self.slots.iter().filter(|s| s.index.is_some()).count();
    }

    /// Checks the allocator, and that every slot and every back-reference
    /// agree with each other.
    pub fn verify_internal_state(&self) -> Result<(), AnimError> {
        self.allocator.verify_internal_state()?;
        if self.motivators.len() != self.allocator.num_indices() {
            return Err(AnimError::Unexcepted);
        }

        for (slot_index, slot) in self.slots.iter().enumerate() {
            let Some(index) = slot.index else {
                continue;
            };
            if !self.allocator.valid_index(index) {
                return Err(AnimError::Unexcepted);
            }
            let id = MotivatorId {
                slot: slot_index as u32,
                generation: slot.generation,
            };
            let count = self.allocator.count_for_index(index);
            if self.motivators[index..index + count].iter().any(|m| *m != Some(id)) {
                return Err(AnimError::Unexcepted);
            }
        }

        for (index, m) in self.motivators.iter().enumerate() {
            if let Some(id) = m {
                let range = self.indices(*id).map_err(|_| AnimError::Unexcepted)?;
                if !range.contains(&index) {
                    return Err(AnimError::Unexcepted);
                }
            }
        }
        return Ok(());
    }
}

///
/// Frame-driven part of a processor, as seen by `AnimationEngine`.
///
pub trait AnimProcessor {
    /// Advances every motivator of the processor by `delta_time`.
    fn advance_frame(&mut self, delta_time: Duration) -> Result<(), AnimError>;

    /// Lower priorities run first in a frame.
    fn priority(&self) -> i32;

    fn name(&self) -> &'static str;

    fn verify_internal_state(&self) -> Result<(), AnimError>;
}

///
/// A processor that stores per-index data behind `Motivator` handles.
///
/// Implementors only expose their core and data, the motivator lifecycle is
/// provided.
///
pub trait IndexedProcessor: AnimProcessor + Sized + 'static {
    type Data: IndexedData;

    fn core(&self) -> &ProcessorCore;

    fn parts(&mut self) -> (&mut ProcessorCore, &mut Self::Data);

    /// Dimensions of a motivator allocated without being specific.
    fn default_dimensions() -> usize {
        return 1;
    }

    fn allocate_id(&mut self, dimensions: usize) -> MotivatorId {
        let (core, data) = self.parts();
        return core.allocate(data, dimensions);
    }

    fn remove_motivator(&mut self, id: MotivatorId) -> Result<(), AnimError> {
        let (core, data) = self.parts();
        return core.remove(data, id);
    }

    fn transfer_motivator(&mut self, id: MotivatorId) -> Result<MotivatorId, AnimError> {
        return self.parts().0.transfer(id);
    }

    fn clone_motivator_id(&mut self, id: MotivatorId) -> Result<MotivatorId, AnimError> {
        let (core, data) = self.parts();
        return core.clone_motivator(data, id);
    }

    fn defragment(&mut self) {
        let (core, data) = self.parts();
        core.defragment(data);
    }
}

/// Allocates a motivator with `dimensions` indices on `processor`.
pub fn allocate_motivator<P: IndexedProcessor>(
    processor: &Rc<RefCell<P>>,
    dimensions: usize,
) -> Result<Motivator<P>, AnimError> {
    let id = processor
        .try_borrow_mut()
        .map_err(|_| AnimError::Unexcepted)?
        .allocate_id(dimensions);
    return Ok(Motivator::new(processor, id));
}
