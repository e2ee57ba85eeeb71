//!
//! The engine owns one processor per motivator kind, steps them every
//! frame in priority order and caches the animation clips it loads.
//!

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::animation_clip::AnimationClip;
use crate::base::{AnimError, DeterministicState};
use crate::motivator::Motivator;
use crate::processor::{allocate_motivator, AnimProcessor, IndexedProcessor};
use crate::rig_processor::RigProcessor;
use crate::spline_processor::SplineProcessor;
use crate::transform_processor::TransformProcessor;

/// Delivers the bytes of clip payloads.
///
/// `load_async` must eventually call `on_load` with the payload (skipped if
/// it could not be read) and then `on_finalize`, either before returning or
/// later on.
pub trait AssetLoader {
    fn load_async(&self, uri: &str, on_load: Box<dyn FnOnce(&[u8])>, on_finalize: Box<dyn FnOnce()>);
}

///
/// Composition root of the animation system.
///
/// `AnimationEngine::create()` registers the spline, transform and rig
/// processors. Motivators are then acquired by processor type:
///
/// ```ignore
/// let mut engine = AnimationEngine::create();
/// let value = engine.acquire_motivator::<SplineProcessor>()?;
/// engine.advance_frame(Duration::from_millis(16))?;
/// ```
///
#[derive(Default)]
pub struct AnimationEngine {
    processors: Vec<Rc<RefCell<dyn AnimProcessor>>>,
    typed_processors: HashMap<TypeId, Box<dyn Any>, DeterministicState>,
    sorted_processors: Option<Vec<Rc<RefCell<dyn AnimProcessor>>>>,
    clips: HashMap<String, Rc<AnimationClip>, DeterministicState>,
    loader: Option<Rc<dyn AssetLoader>>,
}

impl AnimationEngine {
    /// An engine without any processor.
    pub fn new() -> AnimationEngine {
        return AnimationEngine::default();
    }

    /// An engine with the spline, transform and rig processors registered.
    pub fn create() -> AnimationEngine {
        let mut engine = AnimationEngine::new();
        let splines = engine.register_motivator(SplineProcessor::new());
        let transforms = engine.register_motivator(TransformProcessor::new(splines));
        engine.register_motivator(RigProcessor::new(transforms));
        return engine;
    }

    /// Uses `loader` for every following `load_animation_clip()`.
    pub fn with_asset_loader(mut self, loader: Rc<dyn AssetLoader>) -> AnimationEngine {
        self.loader = Some(loader);
        return self;
    }

    pub fn set_asset_loader(&mut self, loader: Rc<dyn AssetLoader>) {
        self.loader = Some(loader);
    }

    /// Makes `processor` the owner of every `Motivator<P>`. Registering a
    /// second processor of the same type replaces the first.
    pub fn register_motivator<P: IndexedProcessor>(&mut self, processor: P) -> Rc<RefCell<P>> {
        let processor = Rc::new(RefCell::new(processor));
        let previous = self
            .typed_processors
            .insert(TypeId::of::<P>(), Box::new(processor.clone()));
        if let Some(previous) = previous.and_then(|p| p.downcast::<Rc<RefCell<P>>>().ok()) {
            let previous: Rc<RefCell<dyn AnimProcessor>> = *previous;
            self.processors.retain(|p| !Rc::ptr_eq(p, &previous));
        }
        self.processors.push(processor.clone());
        self.sorted_processors = None;
        log::debug!("Registered {}", type_name::<P>());
        return processor;
    }

    /// The processor registered for `Motivator<P>`.
    pub fn processor<P: IndexedProcessor>(&self) -> Result<Rc<RefCell<P>>, AnimError> {
        return self
            .typed_processors
            .get(&TypeId::of::<P>())
            .and_then(|p| p.downcast_ref::<Rc<RefCell<P>>>())
            .cloned()
            .ok_or(AnimError::UnregisteredMotivator(type_name::<P>()));
    }

    #[inline]
    pub fn spline_processor(&self) -> Result<Rc<RefCell<SplineProcessor>>, AnimError> {
        return self.processor::<SplineProcessor>();
    }

    #[inline]
    pub fn transform_processor(&self) -> Result<Rc<RefCell<TransformProcessor>>, AnimError> {
        return self.processor::<TransformProcessor>();
    }

    #[inline]
    pub fn rig_processor(&self) -> Result<Rc<RefCell<RigProcessor>>, AnimError> {
        return self.processor::<RigProcessor>();
    }

    /// A new motivator of `P`'s default dimensions.
    pub fn acquire_motivator<P: IndexedProcessor>(&self) -> Result<Motivator<P>, AnimError> {
        return self.acquire_motivator_with_dimensions::<P>(P::default_dimensions());
    }

    pub fn acquire_motivator_with_dimensions<P: IndexedProcessor>(
        &self,
        dimensions: usize,
    ) -> Result<Motivator<P>, AnimError> {
        let processor = self.processor::<P>()?;
        return allocate_motivator(&processor, dimensions);
    }

    /// Advances every processor by `delta_time`, lower priorities first.
    pub fn advance_frame(&mut self, delta_time: Duration) -> Result<(), AnimError> {
        let processors = self.sorted_processors.get_or_insert_with(|| {
            let mut sorted = self.processors.clone();
            sorted.sort_by_key(|p| p.borrow().priority());
            return sorted;
        });
        for processor in processors.iter() {
            let mut processor = processor.try_borrow_mut().map_err(|_| AnimError::Unexcepted)?;
            processor.advance_frame(delta_time)?;
        }
        return Ok(());
    }

    /// Checks the bookkeeping of every processor.
    pub fn verify_internal_state(&self) -> Result<(), AnimError> {
        for processor in &self.processors {
            let processor = processor.try_borrow().map_err(|_| AnimError::Unexcepted)?;
            if let Err(err) = processor.verify_internal_state() {
                log::warn!("{} is inconsistent: {}", processor.name(), err);
                return Err(err);
            }
        }
        return Ok(());
    }

    ///
    /// The clip at `uri`, loading it on first request.
    ///
    /// A new clip is cached and returned empty; it becomes ready once the
    /// asset loader delivers and finalizes it. A clip that fails to load
    /// stays not ready.
    ///
    pub fn load_animation_clip(&mut self, uri: &str) -> Rc<AnimationClip> {
        if let Some(clip) = self.clips.get(uri) {
            return clip.clone();
        }

        let clip = Rc::new(AnimationClip::new(uri));
        self.clips.insert(uri.to_string(), clip.clone());
        let Some(loader) = &self.loader else {
            log::warn!("No asset loader, clip '{}' will never be ready", uri);
            return clip;
        };

        log::debug!("Loading clip '{}'", uri);
        let loading = clip.clone();
        let on_load = Box::new(move |bytes: &[u8]| {
            if let Err(err) = loading.initialize(bytes) {
                log::warn!("Failed to parse clip '{}': {}", loading.uri(), err);
            }
        });
        let finalizing = clip.clone();
        let on_finalize = Box::new(move || finalizing.finalize());
        loader.load_async(uri, on_load, on_finalize);
        return clip;
    }

    /// The clip at `uri` if it was loaded before.
    pub fn cached_clip(&self, uri: &str) -> Option<Rc<AnimationClip>> {
        return self.clips.get(uri).cloned();
    }

    #[inline]
    pub fn num_cached_clips(&self) -> usize {
        return self.clips.len();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use wasm_bindgen_test::*;

    use super::*;
    use crate::base::SPLINE_PROCESSOR_PRIORITY;
    use crate::processor::{IndexedData, ProcessorCore};

    #[derive(Debug, Default)]
    struct NoData;

    impl IndexedData for NoData {
        fn set_num_indices(&mut self, _num_indices: usize) {}
        fn move_indices(&mut self, _old_index: usize, _new_index: usize, _count: usize) {}
        fn reset_indices(&mut self, _index: usize, _count: usize) {}
    }

    /// Records the frame order into a shared log.
    #[derive(Debug)]
    struct Probe {
        core: ProcessorCore,
        data: NoData,
        priority: i32,
        log: Rc<RefCell<Vec<i32>>>,
    }

    impl AnimProcessor for Probe {
        fn advance_frame(&mut self, _delta_time: Duration) -> Result<(), AnimError> {
            self.log.borrow_mut().push(self.priority);
            return Ok(());
        }

        fn priority(&self) -> i32 {
            return self.priority;
        }

        fn name(&self) -> &'static str {
            return "Probe";
        }

        fn verify_internal_state(&self) -> Result<(), AnimError> {
            return self.core.verify_internal_state();
        }
    }

    impl IndexedProcessor for Probe {
        type Data = NoData;

        fn core(&self) -> &ProcessorCore {
            return &self.core;
        }

        fn parts(&mut self) -> (&mut ProcessorCore, &mut NoData) {
            return (&mut self.core, &mut self.data);
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_create_registers_processors() {
        let engine = AnimationEngine::create();
        assert!(engine.spline_processor().is_ok());
        assert!(engine.transform_processor().is_ok());
        assert!(engine.rig_processor().is_ok());
        assert!(engine.acquire_motivator::<SplineProcessor>().unwrap().valid());
        assert!(engine.verify_internal_state().is_ok());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_unregistered_motivator() {
        let engine = AnimationEngine::new();
        let err = engine.acquire_motivator::<SplineProcessor>().unwrap_err();
        assert!(err.is_unregistered_motivator());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_advance_in_priority_order() {
        let mut engine = AnimationEngine::create();
        let log = Rc::new(RefCell::new(Vec::new()));
        engine.register_motivator(Probe {
            core: ProcessorCore::new(),
            data: NoData,
            priority: SPLINE_PROCESSOR_PRIORITY - 1,
            log: log.clone(),
        });
        engine.advance_frame(Duration::from_millis(16)).unwrap();
        engine.advance_frame(Duration::from_millis(16)).unwrap();
        assert_eq!(*log.borrow(), vec![0, 0]);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_replace_processor() {
        let mut engine = AnimationEngine::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let probe = |priority| Probe {
            core: ProcessorCore::new(),
            data: NoData,
            priority,
            log: log.clone(),
        };
        let first = engine.register_motivator(probe(1));
        let second = engine.register_motivator(probe(2));
        assert!(!Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(&engine.processor::<Probe>().unwrap(), &second));
        engine.advance_frame(Duration::ZERO).unwrap();
        assert_eq!(*log.borrow(), vec![2]);
    }

    struct CountingLoader {
        calls: Cell<usize>,
    }

    impl AssetLoader for CountingLoader {
        fn load_async(&self, _uri: &str, _on_load: Box<dyn FnOnce(&[u8])>, on_finalize: Box<dyn FnOnce()>) {
            self.calls.set(self.calls.get() + 1);
            on_finalize();
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_clip_cache() {
        let loader = Rc::new(CountingLoader { calls: Cell::new(0) });
        let mut engine = AnimationEngine::create().with_asset_loader(loader.clone());
        let a = engine.load_animation_clip("clips/walk");
        let b = engine.load_animation_clip("clips/walk");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(loader.calls.get(), 1);
        assert_eq!(engine.num_cached_clips(), 1);
        assert!(engine.cached_clip("clips/run").is_none());
        assert!(Rc::ptr_eq(&engine.cached_clip("clips/walk").unwrap(), &a));

        // finalized without a payload
        assert!(!a.is_ready());

        // every uri gets its own clip
        let uris: Vec<String> = (0..64).map(|i| format!("clips/pose_{}", i)).collect();
        for uri in &uris {
            assert_eq!(engine.load_animation_clip(uri).uri(), uri);
        }
        assert_eq!(engine.num_cached_clips(), 65);
        for uri in &uris {
            assert_eq!(engine.cached_clip(uri).unwrap().uri(), uri);
        }
        assert_eq!(loader.calls.get(), 65);
    }
}
