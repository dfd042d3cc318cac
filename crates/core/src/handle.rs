//! Generation-checked handle table
//!
//! A handle packs a slot index into the low half of a machine word and a
//! generation counter into the high half. Invalidating a handle empties its
//! slot; the slot may later be reused under a higher generation, so a stale
//! handle from a previous allocation cycle never resolves again.
//!
//! The table is the sole long-lived owner of the values it stores. Callers get
//! clones out of [`HandleTable::resolve`] (for bridge objects these are `Arc`s
//! that live for the duration of one call).

use crate::{Error, Result};
use parking_lot::RwLock;

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const MAX_GENERATION: usize = usize::MAX >> INDEX_BITS;

/// Opaque identifier handed to the foreign caller
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    fn new(index: usize, generation: usize) -> Self {
        Handle((generation << INDEX_BITS) | index)
    }

    /// Reinterpret a raw machine word as a handle
    pub const fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    /// The machine word handed across the boundary
    pub const fn as_raw(self) -> usize {
        self.0
    }

    fn index(self) -> usize {
        self.0 & INDEX_MASK
    }

    fn generation(self) -> usize {
        self.0 >> INDEX_BITS
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .finish()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct Slot<T> {
    generation: usize,
    value: Option<T>,
    /// Kind of the latest value, kept after invalidation
    kind: &'static str,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

/// Thread-safe registry mapping handles to owned values
pub struct HandleTable<T> {
    inner: RwLock<Slots<T>>,
    kind_of: fn(&T) -> &'static str,
}

fn unnamed<T>(_: &T) -> &'static str {
    ""
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::with_kinds(unnamed)
    }

    /// Create an empty table that remembers the kind of retired values
    pub fn with_kinds(kind_of: fn(&T) -> &'static str) -> Self {
        Self {
            inner: RwLock::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            kind_of,
        }
    }

    /// Register a value and return its fresh handle
    pub fn allocate(&self, value: T) -> Result<Handle> {
        self.allocate_with(|_| value)
    }

    /// Register a value built from its own handle
    ///
    /// `build` runs while the table's write lock is held, so it must not
    /// block or touch the table.
    pub fn allocate_with<F>(&self, build: F) -> Result<Handle>
    where
        F: FnOnce(Handle) -> T,
    {
        let mut inner = self.inner.write();

        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                let index = inner.slots.len();
                if index > INDEX_MASK {
                    return Err(Error::Internal("handle table exhausted".to_string()));
                }
                inner.slots.push(Slot {
                    generation: 0,
                    value: None,
                    kind: "",
                });
                index
            }
        };

        let slot = &mut inner.slots[index];
        slot.generation += 1;
        let handle = Handle::new(index, slot.generation);
        let value = build(handle);
        slot.kind = (self.kind_of)(&value);
        slot.value = Some(value);
        inner.live += 1;

        Ok(handle)
    }

    /// Remove the mapping, returning the stored value if the handle was live
    ///
    /// The returned value is dropped by the caller, outside the table lock.
    pub fn invalidate(&self, handle: Handle) -> Option<T> {
        let mut inner = self.inner.write();
        let index = handle.index();

        let slot = inner.slots.get_mut(index)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        // A slot whose generation counter is spent is never handed out again.
        let reusable = slot.generation < MAX_GENERATION;

        inner.live -= 1;
        if reusable {
            inner.free.push(index);
        }

        Some(value)
    }

    /// Whether the handle was issued by this table and has since been invalidated
    pub fn is_retired(&self, handle: Handle) -> bool {
        let inner = self.inner.read();
        let generation = handle.generation();
        if generation == 0 {
            return false;
        }
        match inner.slots.get(handle.index()) {
            Some(slot) => {
                generation < slot.generation
                    || (generation == slot.generation && slot.value.is_none())
            }
            None => false,
        }
    }

    /// Kind of the value a handle referred to before it was invalidated
    ///
    /// `None` if the handle is live, unknown, or its slot has been reused
    /// since.
    pub fn retired_kind(&self, handle: Handle) -> Option<&'static str> {
        let inner = self.inner.read();
        inner
            .slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation() && slot.value.is_none())
            .map(|slot| slot.kind)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    /// Whether no handle is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate every live handle, returning the values
    pub fn drain(&self) -> Vec<(Handle, T)> {
        let mut inner = self.inner.write();
        let mut drained = Vec::with_capacity(inner.live);
        let mut freed = Vec::new();

        for (index, slot) in inner.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                drained.push((Handle::new(index, slot.generation), value));
                if slot.generation < MAX_GENERATION {
                    freed.push(index);
                }
            }
        }

        inner.free.extend(freed);
        inner.live = 0;
        drained
    }
}

impl<T: Clone> HandleTable<T> {
    /// Look up the value behind a handle
    pub fn resolve(&self, handle: Handle) -> Result<T> {
        let inner = self.inner.read();
        inner
            .slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.clone())
            .ok_or(Error::HandleNotFound(handle))
    }
}
