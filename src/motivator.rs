//!
//! Handle to the state of one motivator inside a processor.
//!

use std::cell::RefCell;
use std::fmt;
use std::ops::Range;
use std::rc::{Rc, Weak};

use crate::base::AnimError;
use crate::processor::{IndexedProcessor, MotivatorId};

///
/// Exclusive handle to a run of indices in processor `P`.
///
/// The handle holds no data itself. It can't be copied; `take()` moves the
/// ownership into a new handle and leaves this one invalid. Dropping a bound
/// handle frees its indices in the processor.
///
/// Every accessor fails with an error, instead of touching the wrong data,
/// when the handle was taken from, was removed, or outlived its processor.
///
pub struct Motivator<P: IndexedProcessor> {
    processor: Weak<RefCell<P>>,
    id: Option<MotivatorId>,
}

impl<P: IndexedProcessor> Default for Motivator<P> {
    fn default() -> Motivator<P> {
        return Motivator {
            processor: Weak::new(),
            id: None,
        };
    }
}

impl<P: IndexedProcessor> fmt::Debug for Motivator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("Motivator")
            .field("processor", &std::any::type_name::<P>())
            .field("id", &self.id)
            .finish();
    }
}

impl<P: IndexedProcessor> Motivator<P> {
    pub(crate) fn new(processor: &Rc<RefCell<P>>, id: MotivatorId) -> Motivator<P> {
        return Motivator {
            processor: Rc::downgrade(processor),
            id: Some(id),
        };
    }

    /// A handle bound to nothing.
    #[inline]
    pub fn invalid() -> Motivator<P> {
        return Motivator::default();
    }

    #[inline]
    pub fn id(&self) -> Option<MotivatorId> {
        return self.id;
    }

    /// True if the handle currently owns indices in a live processor.
    pub fn valid(&self) -> bool {
        let (Some(id), Some(processor)) = (self.id, self.processor.upgrade()) else {
            return false;
        };
        return processor.try_borrow().is_ok_and(|p| p.core().is_valid(id));
    }

    /// Moves ownership into a new handle. `self` becomes invalid.
    /// Taking from an invalid handle returns an invalid handle.
    ///
    /// While the processor is borrowed nothing moves: `self` keeps its
    /// indices and the returned handle is invalid.
    pub fn take(&mut self) -> Motivator<P> {
        let (Some(id), Some(processor)) = (self.id, self.processor.upgrade()) else {
            self.id = None;
            return Motivator::invalid();
        };
        let Ok(mut p) = processor.try_borrow_mut() else {
            log::debug!("Processor busy, motivator slot {} not moved", id.slot());
            return Motivator::invalid();
        };
        let new_id = p.transfer_motivator(id);
        drop(p);

        self.id = None;
        return match new_id {
            Ok(new_id) => Motivator::new(&processor, new_id),
            Err(_) => Motivator::invalid(),
        };
    }

    /// Frees the indices in the processor. The handle becomes invalid.
    pub fn invalidate(&mut self) {
        if let (Some(id), Some(processor)) = (self.id.take(), self.processor.upgrade()) {
            match processor.try_borrow_mut() {
                Ok(mut p) => {
                    if let Err(err) = p.remove_motivator(id) {
                        log::debug!("Removing {} motivator: {}", p.name(), err);
                    }
                }
                Err(_) => log::debug!("Processor busy, motivator slot {} leaked", id.slot()),
            }
        }
    }

    /// The processor that owns the handle's data.
    pub fn processor(&self) -> Result<Rc<RefCell<P>>, AnimError> {
        return self.processor.upgrade().ok_or(AnimError::ProcessorGone);
    }

    /// A new motivator, on the same processor, holding a copy of this one's state.
    pub fn clone_motivator(&self) -> Result<Motivator<P>, AnimError> {
        let id = self.id.ok_or(AnimError::InvalidMotivator)?;
        let processor = self.processor()?;
        let new_id = processor
            .try_borrow_mut()
            .map_err(|_| AnimError::Unexcepted)?
            .clone_motivator_id(id)?;
        return Ok(Motivator::new(&processor, new_id));
    }

    /// Number of indices owned.
    pub fn dimensions(&self) -> Result<usize, AnimError> {
        return self.with(|p, id| p.core().dimensions(id))?;
    }

    /// Runs `f` with the processor and the handle's index range.
    pub fn with_indices<R>(&self, f: impl FnOnce(&P, Range<usize>) -> R) -> Result<R, AnimError> {
        return self.with(|p, id| -> Result<R, AnimError> { Ok(f(p, p.core().indices(id)?)) })?;
    }

    /// Runs `f` with the mutable processor and the handle's index range.
    pub fn with_indices_mut<R>(&self, f: impl FnOnce(&mut P, Range<usize>) -> R) -> Result<R, AnimError> {
        return self.with_mut(|p, id| -> Result<R, AnimError> {
            let indices = p.core().indices(id)?;
            return Ok(f(p, indices));
        })?;
    }

    fn with<R>(&self, f: impl FnOnce(&P, MotivatorId) -> R) -> Result<R, AnimError> {
        let id = self.id.ok_or(AnimError::InvalidMotivator)?;
        let processor = self.processor()?;
        let p = processor.try_borrow().map_err(|_| AnimError::Unexcepted)?;
        return Ok(f(&p, id));
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut P, MotivatorId) -> R) -> Result<R, AnimError> {
        let id = self.id.ok_or(AnimError::InvalidMotivator)?;
        let processor = self.processor()?;
        let mut p = processor.try_borrow_mut().map_err(|_| AnimError::Unexcepted)?;
        return Ok(f(&mut p, id));
    }
}

impl<P: IndexedProcessor> Drop for Motivator<P> {
    fn drop(&mut self) {
        self.invalidate();
    }
}
