// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Dense integer to object mapping with typed dispatch, refcounting and
//! free-list slot reuse. A Rust rendering of `handle.c`/`handle.h`: the
//! C version keys everything off a `void *type` sentinel and a raw
//! `vfptrs.close`/`vfptrs.dump` pair; here the vtable is a boxed trait
//! object and the type tag is `TypeId`.

use std::any::{Any, TypeId};
use std::fmt;

use log::debug;

use crate::error::{Error, Result};

/// Anything the handle table can own must implement `close` (run exactly
/// once, when the last duplicate is released) and may implement `dump`
/// for diagnostics.
pub trait HandleObject: Any {
    /// Runs when the handle's refcount drops to zero. Exactly-once.
    fn close(&mut self);

    /// One-line diagnostic description, printed by `Handle::dump`.
    fn dump(&self) -> String {
        String::from("<no detail>")
    }

    /// Upcast for downcasting back to the concrete type via `data`.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Integer name for a handle-table object.
pub type Handle = u32;

enum Slot {
    /// Index of the next free slot, or `None` for end-of-list. Mirrors
    /// `next == -1`.
    Free(Option<u32>),
    /// `next == -2` in the C original: this slot is live.
    Live(Entry),
}

struct Entry {
    type_id: TypeId,
    object: Box<dyn HandleObject>,
    refcount: u32,
    created: String,
}

/// Growth starts at 256 slots and doubles on exhaustion, as specified.
const INITIAL_CAPACITY: usize = 256;

/// The process-wide (here: runtime-wide) handle table.
pub struct HandleTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.slots.len())
            .finish()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable {
            slots: Vec::new(),
            free_head: None,
        }
    }

    fn grow(&mut self) {
        let old_len = self.slots.len();
        let new_len = if old_len == 0 {
            INITIAL_CAPACITY
        } else {
            old_len * 2
        };
        self.slots.reserve(new_len - old_len);
        for i in old_len..new_len {
            let next = if i + 1 == new_len { None } else { Some(i as u32 + 1) };
            self.slots.push(Slot::Free(next));
        }
        self.free_head = Some(old_len as u32);
    }

    /// Allocates a slot for `object`, refcount starts at 1. `created` is
    /// the call site, rendered by the public entry points via
    /// `#[track_caller]` in place of the source's `__FILE__:__LINE__`
    /// macro capture.
    pub fn create<T: HandleObject>(&mut self, object: T, created: impl Into<String>) -> Result<Handle> {
        if self.free_head.is_none() {
            self.grow();
        }
        let idx = self.free_head.ok_or(Error::Nomem)?;
        let next = match &self.slots[idx as usize] {
            Slot::Free(n) => *n,
            Slot::Live(_) => unreachable!("free-list pointed at a live slot"),
        };
        self.free_head = next;
        self.slots[idx as usize] = Slot::Live(Entry {
            type_id: TypeId::of::<T>(),
            object: Box::new(object),
            refcount: 1,
            created: created.into(),
        });
        Ok(idx)
    }

    fn entry(&self, h: Handle) -> Result<&Entry> {
        match self.slots.get(h as usize) {
            Some(Slot::Live(e)) => Ok(e),
            _ => Err(Error::Badf),
        }
    }

    fn entry_mut(&mut self, h: Handle) -> Result<&mut Entry> {
        match self.slots.get_mut(h as usize) {
            Some(Slot::Live(e)) => Ok(e),
            _ => Err(Error::Badf),
        }
    }

    /// Increments the refcount; returns the same handle.
    pub fn dup(&mut self, h: Handle) -> Result<Handle> {
        self.entry_mut(h)?.refcount += 1;
        Ok(h)
    }

    /// Borrows the object if it has the requested concrete type.
    pub fn data<T: HandleObject>(&self, h: Handle) -> Result<&T> {
        let entry = self.entry(h)?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(Error::Notsup);
        }
        Ok(entry.object.as_any().downcast_ref::<T>().expect("type_id matched"))
    }

    /// Mutably borrows the object if it has the requested concrete type.
    pub fn data_mut<T: HandleObject>(&mut self, h: Handle) -> Result<&mut T> {
        let entry = self.entry_mut(h)?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(Error::Notsup);
        }
        Ok(entry.object.as_any_mut().downcast_mut::<T>().expect("type_id matched"))
    }

    /// Prints a descriptor plus type-specific detail via `log::debug!`.
    pub fn dump(&self, h: Handle) -> Result<()> {
        let entry = self.entry(h)?;
        debug!(
            "handle {{ {} }}: refcount={} created={}",
            entry.object.dump(),
            entry.refcount,
            entry.created
        );
        Ok(())
    }

    /// True if the next `close(h)` would be the final release (refcount
    /// is 1) and therefore actually run the handle's `close` cascade,
    /// rather than just decrementing. Lets a caller gate cascade-only work
    /// — e.g. `chdone`'s waiter wakeup, a coroutine's cancel-and-join — so
    /// it runs exactly once, on the release that matters (spec.md:43: "a
    /// handle with refcount N is released only after N closes; close is
    /// invoked exactly once, on the final release").
    pub fn would_release(&self, h: Handle) -> Result<bool> {
        Ok(self.entry(h)?.refcount == 1)
    }

    /// Decrements the refcount; on the final release runs `close` and
    /// returns the slot to the free list. The caller (the scheduler) is
    /// responsible for toggling its own `stopping` flag around the close
    /// callback so a blocking call from inside `close` fails fast instead
    /// of recursively suspending.
    pub fn close(&mut self, h: Handle) -> Result<()> {
        {
            let entry = self.entry_mut(h)?;
            if entry.refcount > 1 {
                entry.refcount -= 1;
                return Ok(());
            }
        }
        // Final release: run close, then recycle the slot.
        if let Slot::Live(mut entry) = std::mem::replace(&mut self.slots[h as usize], Slot::Free(None)) {
            entry.object.close();
        }
        self.slots[h as usize] = Slot::Free(self.free_head);
        self.free_head = Some(h);
        Ok(())
    }

    /// True if `h` currently names a live slot (used by callers that want
    /// to distinguish "stale handle" from a real `ERR_BADF`, e.g. tests).
    pub fn is_live(&self, h: Handle) -> bool {
        matches!(self.slots.get(h as usize), Some(Slot::Live(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(u32);
    impl HandleObject for Dummy {
        fn close(&mut self) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct OtherType;
    impl HandleObject for OtherType {
        fn close(&mut self) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn create_dup_close_roundtrip() {
        let mut t = HandleTable::new();
        let h = t.create(Dummy(42), "test:1").unwrap();
        assert_eq!(t.data::<Dummy>(h).unwrap().0, 42);

        let h2 = t.dup(h).unwrap();
        assert_eq!(h, h2);

        assert!(!t.would_release(h).unwrap());
        // First close just decrements the refcount.
        t.close(h).unwrap();
        assert!(t.is_live(h));

        assert!(t.would_release(h).unwrap());

        // Second close runs the destructor and frees the slot.
        t.close(h).unwrap();
        assert!(!t.is_live(h));
    }

    #[test]
    fn bad_handle_is_badf() {
        let t = HandleTable::new();
        assert_eq!(t.data::<Dummy>(0).unwrap_err(), Error::Badf);
    }

    #[test]
    fn wrong_type_is_notsup() {
        let mut t = HandleTable::new();
        let h = t.create(Dummy(1), "test:2").unwrap();
        assert_eq!(t.data::<OtherType>(h).unwrap_err(), Error::Notsup);
    }

    #[test]
    fn slots_grow_and_reuse_freed_indices() {
        let mut t = HandleTable::new();
        let mut handles = Vec::new();
        for i in 0..300 {
            handles.push(t.create(Dummy(i), "test:3").unwrap());
        }
        assert!(handles.len() > INITIAL_CAPACITY);

        let freed = handles[0];
        t.close(freed).unwrap();
        let reused = t.create(Dummy(999), "test:4").unwrap();
        assert_eq!(reused, freed);
    }
}
