//! Per-product payload cache.
//!
//! Every declared slot runs through a small state machine:
//!
//! ```text
//!              get (first caller)            load ok
//!  Unloaded ─────────────────────▶ Loading ───────────▶ Loaded
//!     ▲                             │  ▲                   │
//!     └──────── load failed ────────┘  │                   │ invalidate
//!                                      │ get               ▼
//!                                      └────────────── Invalidated
//! ```
//!
//! Callers arriving while a slot is `Loading` wait on a condition variable for
//! the in-flight load instead of starting another, so each slot is read from
//! disk at most once at a time. Invalidating a slot mid-load bumps its
//! generation: the loading caller still gets its result, but the slot ends
//! `Invalidated`, so callers that were waiting on it start a fresh load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::PayloadError;

use super::payload::Payload;

/// Observable state of one payload slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unloaded,
    Loading,
    Loaded,
    Invalidated,
}

#[derive(Debug)]
enum Slot {
    Unloaded,
    Loading,
    Loaded(Arc<Payload>),
    Invalidated,
}

impl Slot {
    fn state(&self) -> SlotState {
        match self {
            Slot::Unloaded => SlotState::Unloaded,
            Slot::Loading => SlotState::Loading,
            Slot::Loaded(_) => SlotState::Loaded,
            Slot::Invalidated => SlotState::Invalidated,
        }
    }
}

#[derive(Debug)]
struct SlotEntry {
    slot: Slot,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct PayloadCache {
    slots: Mutex<HashMap<String, SlotEntry>>,
    ready: Condvar,
    loads: AtomicUsize,
}

impl PayloadCache {
    pub(crate) fn new<I: IntoIterator<Item = String>>(slots: I) -> Self {
        let slots = slots
            .into_iter()
            .map(|name| {
                (
                    name,
                    SlotEntry {
                        slot: Slot::Unloaded,
                        generation: 0,
                    },
                )
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            ready: Condvar::new(),
            loads: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SlotEntry>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached payload for `name`, running `load` if the slot is not
    /// loaded and no other caller is already loading it.
    pub(crate) fn get_or_load<F>(&self, name: &str, load: F) -> Result<Arc<Payload>, PayloadError>
    where
        F: FnOnce() -> Result<Payload, PayloadError>,
    {
        let mut slots = self.lock();
        let generation = loop {
            let entry = slots
                .get_mut(name)
                .ok_or_else(|| PayloadError::UnknownSlot(name.to_string()))?;
            match &entry.slot {
                Slot::Loaded(payload) => return Ok(Arc::clone(payload)),
                Slot::Loading => {
                    slots = self
                        .ready
                        .wait(slots)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Slot::Unloaded | Slot::Invalidated => {
                    entry.slot = Slot::Loading;
                    break entry.generation;
                }
            }
        };
        drop(slots);

        let mut guard = LoadGuard {
            cache: self,
            name,
            done: false,
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        let result = load().map(Arc::new);

        let mut slots = self.lock();
        if let Some(entry) = slots.get_mut(name) {
            entry.slot = match &result {
                Ok(payload) if entry.generation == generation => Slot::Loaded(Arc::clone(payload)),
                Ok(_) => Slot::Invalidated,
                Err(_) => Slot::Unloaded,
            };
        }
        guard.done = true;
        drop(slots);
        self.ready.notify_all();
        result
    }

    /// Drop cached payloads for `name`, or for every slot when `None`.
    /// Returns false if `name` is not a declared slot.
    pub(crate) fn invalidate(&self, name: Option<&str>) -> bool {
        let mut slots = self.lock();
        let invalidate = |entry: &mut SlotEntry| {
            entry.generation += 1;
            if matches!(entry.slot, Slot::Loaded(_)) {
                entry.slot = Slot::Invalidated;
            }
        };
        match name {
            Some(name) => match slots.get_mut(name) {
                Some(entry) => {
                    invalidate(entry);
                    true
                }
                None => false,
            },
            None => {
                slots.values_mut().for_each(invalidate);
                true
            }
        }
    }

    pub(crate) fn state(&self, name: &str) -> Option<SlotState> {
        self.lock().get(name).map(|entry| entry.slot.state())
    }

    /// True if any slot currently holds a payload.
    pub(crate) fn any_loaded(&self) -> bool {
        self.lock()
            .values()
            .any(|entry| matches!(entry.slot, Slot::Loaded(_)))
    }

    /// Number of loads started over the cache's lifetime.
    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

// Resets a slot left in `Loading` when the loader unwinds, so waiters retry
// instead of blocking forever.
struct LoadGuard<'a> {
    cache: &'a PayloadCache,
    name: &'a str,
    done: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(entry) = self.cache.lock().get_mut(self.name) {
            entry.slot = Slot::Unloaded;
        }
        self.cache.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use crate::label::{ElementType, PayloadDescriptor, PayloadLayout};

    fn fixture() -> (tempfile::TempDir, PayloadDescriptor) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p.dat"), [1u8, 2, 3, 4]).unwrap();
        let desc = PayloadDescriptor {
            slot: "p".into(),
            file: "p.dat".into(),
            offset: 0,
            layout: PayloadLayout::Array {
                element: ElementType::UInt8,
                shape: vec![4],
            },
        };
        (dir, desc)
    }

    fn load(desc: &PayloadDescriptor, dir: &Path) -> Result<Payload, PayloadError> {
        super::super::payload::materialize(desc, dir)
    }

    #[test]
    fn test_second_get_returns_cached_payload() {
        let (dir, desc) = fixture();
        let cache = PayloadCache::new(["p".to_string()]);
        assert_eq!(cache.state("p"), Some(SlotState::Unloaded));

        let first = cache.get_or_load("p", || load(&desc, dir.path())).unwrap();
        let second = cache
            .get_or_load("p", || panic!("must not reload a cached slot"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.state("p"), Some(SlotState::Loaded));
        assert_eq!(cache.loads(), 1);
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let (dir, desc) = fixture();
        let cache = PayloadCache::new(["p".to_string()]);
        let first = cache.get_or_load("p", || load(&desc, dir.path())).unwrap();

        assert!(cache.invalidate(Some("p")));
        assert_eq!(cache.state("p"), Some(SlotState::Invalidated));
        assert!(!cache.any_loaded());

        let second = cache.get_or_load("p", || load(&desc, dir.path())).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.loads(), 2);
    }

    #[test]
    fn test_invalidate_during_load_discards_result() {
        let (dir, desc) = fixture();
        let cache = PayloadCache::new(["p".to_string()]);
        let stale = cache
            .get_or_load("p", || {
                assert_eq!(cache.state("p"), Some(SlotState::Loading));
                assert!(cache.invalidate(Some("p")));
                load(&desc, dir.path())
            })
            .unwrap();
        assert_eq!(stale.len(), 4);
        assert_eq!(cache.state("p"), Some(SlotState::Invalidated));

        let fresh = cache.get_or_load("p", || load(&desc, dir.path())).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(cache.loads(), 2);
    }

    #[test]
    fn test_unknown_slot() {
        let cache = PayloadCache::new(["p".to_string()]);
        assert!(matches!(
            cache.get_or_load("q", || panic!("no load for unknown slot")),
            Err(PayloadError::UnknownSlot(_))
        ));
        assert!(!cache.invalidate(Some("q")));
    }

    #[test]
    fn test_failed_load_returns_slot_to_unloaded() {
        let cache = PayloadCache::new(["p".to_string()]);
        let err = cache
            .get_or_load("p", || Err(PayloadError::UnknownSlot("p".into())))
            .unwrap_err();
        assert!(matches!(err, PayloadError::UnknownSlot(_)));
        assert_eq!(cache.state("p"), Some(SlotState::Unloaded));
    }

    #[test]
    fn test_concurrent_callers_share_one_load() {
        let (dir, desc) = fixture();
        let cache = Arc::new(PayloadCache::new(["p".to_string()]));
        let barrier = Arc::new(Barrier::new(8));
        let dir_path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let desc = desc.clone();
                let dir_path = dir_path.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_load("p", || {
                            thread::sleep(Duration::from_millis(20));
                            load(&desc, &dir_path)
                        })
                        .unwrap()
                })
            })
            .collect();
        let payloads: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(cache.loads(), 1);
        assert!(payloads.iter().all(|p| Arc::ptr_eq(p, &payloads[0])));
    }

    #[test]
    fn test_panicking_loader_releases_waiters() {
        let (dir, desc) = fixture();
        let cache = Arc::new(PayloadCache::new(["p".to_string()]));
        let panicking = Arc::clone(&cache);
        let result = thread::spawn(move || {
            panicking.get_or_load("p", || panic!("loader blew up"))
        })
        .join();
        assert!(result.is_err());
        assert_eq!(cache.state("p"), Some(SlotState::Unloaded));
        assert!(cache.get_or_load("p", || load(&desc, dir.path())).is_ok());
    }
}
